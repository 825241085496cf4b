//! `process` directives: byte post-processing applied to a field's raw
//! extent before it is parsed.
//!
//! `xor` and `rol`/`ror` ship builtin; anything else (compression, crypto)
//! is registered by the caller through [`super::ParseOptions`]. The registry
//! itself is deliberately not part of the core.

use crate::error::ParseErrorKind;
use crate::value::Value;

pub trait Processor {
    fn apply(&self, data: &[u8], args: &[Value]) -> Result<Vec<u8>, ParseErrorKind>;
}

impl<F> Processor for F
where
    F: Fn(&[u8], &[Value]) -> Result<Vec<u8>, ParseErrorKind>,
{
    fn apply(&self, data: &[u8], args: &[Value]) -> Result<Vec<u8>, ParseErrorKind> {
        self(data, args)
    }
}

pub(crate) fn run_builtin(
    name: &str,
    data: &[u8],
    args: &[Value],
) -> Option<Result<Vec<u8>, ParseErrorKind>> {
    match name {
        "xor" => Some(process_xor(data, args)),
        "rol" => Some(process_rotate(data, args, true)),
        "ror" => Some(process_rotate(data, args, false)),
        _ => None,
    }
}

/// `xor(key)` with an integer key XORs every byte; a byte-array key is
/// cycled over the data.
fn process_xor(data: &[u8], args: &[Value]) -> Result<Vec<u8>, ParseErrorKind> {
    let key: Vec<u8> = match args {
        [Value::Int(n)] => vec![(*n & 0xff) as u8],
        [Value::Bytes(b)] if !b.is_empty() => b.to_vec(),
        _ => {
            return Err(ParseErrorKind::InvalidProcessArgs {
                name: "xor".to_string(),
                message: "expects one integer or byte-array argument".to_string(),
            })
        }
    };
    Ok(data
        .iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect())
}

fn process_rotate(data: &[u8], args: &[Value], left: bool) -> Result<Vec<u8>, ParseErrorKind> {
    let amount = match args {
        [Value::Int(n)] => (n.rem_euclid(8)) as u32,
        _ => {
            return Err(ParseErrorKind::InvalidProcessArgs {
                name: if left { "rol" } else { "ror" }.to_string(),
                message: "expects one integer argument".to_string(),
            })
        }
    };
    Ok(data
        .iter()
        .map(|b| {
            if left {
                b.rotate_left(amount)
            } else {
                b.rotate_right(amount)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_with_single_byte_key() {
        let out = process_xor(&[0x00, 0xff, 0x5f], &[Value::Int(0x5f)]).unwrap();
        assert_eq!(out, vec![0x5f, 0xa0, 0x00]);
    }

    #[test]
    fn xor_with_cycled_key() {
        let key = Value::Bytes(bytes::Bytes::from_static(&[0x01, 0x02]));
        let out = process_xor(&[0x10, 0x20, 0x30], &[key]).unwrap();
        assert_eq!(out, vec![0x11, 0x22, 0x31]);
    }

    #[test]
    fn bad_arguments_are_not_unknown_directives() {
        let err = process_xor(&[0x00], &[]).unwrap_err();
        assert!(matches!(
            err,
            ParseErrorKind::InvalidProcessArgs { ref name, .. } if name == "xor"
        ));
        let err = process_rotate(&[0x00], &[Value::Bool(true)], false).unwrap_err();
        assert!(matches!(
            err,
            ParseErrorKind::InvalidProcessArgs { ref name, .. } if name == "ror"
        ));
    }

    #[test]
    fn rotations() {
        let out = run_builtin("rol", &[0b1000_0001], &[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(out, vec![0b0000_0011]);
        let out = run_builtin("ror", &[0b0000_0011], &[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(out, vec![0b1000_0001]);
    }
}
