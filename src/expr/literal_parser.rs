//! Literal parsers: integers (decimal/hex/octal/binary with `_`
//! separators), floats, single- and double-quoted strings with escape
//! sequences, and booleans.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_while_m_n};
use nom::character::complete::{char as nom_char, one_of, satisfy};
use nom::combinator::{cut, map, map_opt, not, opt, recognize, value};
use nom::multi::{many0, many1};
use nom::sequence::{delimited, preceded, terminated, tuple};
use nom::Parser;
use nom_supreme::ParserExt;

use super::ast::Expr;
use super::errors::EResult;

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn digit_run<'a>(digits: &'static str) -> impl FnMut(&'a str) -> EResult<'a, &'a str> {
    recognize(many1(terminated(one_of(digits), many0(nom_char('_')))))
}

fn from_radix(s: &str, radix: u32) -> Option<i128> {
    i128::from_str_radix(&s.replace('_', ""), radix).ok()
}

pub fn parse_integer(input: &str) -> EResult<'_, Expr> {
    alt((
        map_opt(
            preceded(alt((tag("0x"), tag("0X"))), cut(digit_run("0123456789abcdefABCDEF"))),
            |s| from_radix(s, 16).map(Expr::IntLit),
        ),
        map_opt(
            preceded(alt((tag("0o"), tag("0O"))), cut(digit_run("01234567"))),
            |s| from_radix(s, 8).map(Expr::IntLit),
        ),
        map_opt(
            preceded(alt((tag("0b"), tag("0B"))), cut(digit_run("01"))),
            |s| from_radix(s, 2).map(Expr::IntLit),
        ),
        map_opt(digit_run("0123456789"), |s| {
            from_radix(s, 10).map(Expr::IntLit)
        }),
    ))
    .context("integer literal")
    .parse(input)
}

/// Floats require a fractional part or an exponent; `1.to_s` therefore
/// parses as an integer with a member access, not as a malformed float.
pub fn parse_float(input: &str) -> EResult<'_, Expr> {
    let exponent = |i| {
        recognize(tuple((
            one_of("eE"),
            opt(one_of("+-")),
            digit_run("0123456789"),
        )))(i)
    };
    map_opt(
        alt((
            recognize(tuple((
                digit_run("0123456789"),
                nom_char('.'),
                digit_run("0123456789"),
                opt(exponent),
            ))),
            recognize(tuple((digit_run("0123456789"), exponent))),
        )),
        |s: &str| s.replace('_', "").parse::<f64>().ok().map(Expr::FloatLit),
    )
    .context("float literal")
    .parse(input)
}

fn escape_char(input: &str) -> EResult<'_, char> {
    alt((
        value('\\', nom_char('\\')),
        value('"', nom_char('"')),
        value('\'', nom_char('\'')),
        value('\n', nom_char('n')),
        value('\r', nom_char('r')),
        value('\t', nom_char('t')),
        value('\0', nom_char('0')),
        value('\u{7}', nom_char('a')),
        value('\u{8}', nom_char('b')),
        value('\u{b}', nom_char('v')),
        value('\u{c}', nom_char('f')),
        value('\u{1b}', nom_char('e')),
        map_opt(
            preceded(
                nom_char('x'),
                take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
            ),
            |s: &str| char::from_u32(u32::from_str_radix(s, 16).ok()?),
        ),
        map_opt(
            preceded(
                nom_char('u'),
                take_while_m_n(4, 4, |c: char| c.is_ascii_hexdigit()),
            ),
            |s: &str| char::from_u32(u32::from_str_radix(s, 16).ok()?),
        ),
    ))(input)
}

fn quoted<'a>(quote: char, forbidden: &'static str) -> impl FnMut(&'a str) -> EResult<'a, String> {
    move |input| {
        delimited(
            nom_char(quote),
            map(
                opt(nom::bytes::complete::escaped_transform(
                    is_not(forbidden),
                    '\\',
                    escape_char,
                )),
                Option::unwrap_or_default,
            ),
            cut(nom_char(quote)),
        )(input)
    }
}

pub fn parse_string(input: &str) -> EResult<'_, Expr> {
    alt((
        map(quoted('"', "\\\""), Expr::StrLit),
        map(quoted('\'', "\\'"), Expr::StrLit),
    ))
    .context("string literal")
    .parse(input)
}

pub fn parse_boolean(input: &str) -> EResult<'_, Expr> {
    alt((
        value(
            Expr::BoolLit(true),
            terminated(tag("true"), not(satisfy(is_ident_char))),
        ),
        value(
            Expr::BoolLit(false),
            terminated(tag("false"), not(satisfy(is_ident_char))),
        ),
    ))
    .context("boolean literal")
    .parse(input)
}

pub fn parse_literal(input: &str) -> EResult<'_, Expr> {
    alt((parse_boolean, parse_string, parse_float, parse_integer)).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(src: &str) -> Expr {
        let (rest, e) = parse_literal(src).unwrap();
        assert!(rest.is_empty(), "unparsed tail {rest:?}");
        e
    }

    #[test]
    fn integer_radixes() {
        assert_eq!(lit("42"), Expr::IntLit(42));
        assert_eq!(lit("0x2a"), Expr::IntLit(42));
        assert_eq!(lit("0o52"), Expr::IntLit(42));
        assert_eq!(lit("0b101010"), Expr::IntLit(42));
        assert_eq!(lit("1_000_000"), Expr::IntLit(1_000_000));
    }

    #[test]
    fn floats_need_fraction_or_exponent() {
        assert_eq!(lit("1.5"), Expr::FloatLit(1.5));
        assert_eq!(lit("2e3"), Expr::FloatLit(2000.0));
        let (rest, e) = parse_literal("1.to_s").unwrap();
        assert_eq!(e, Expr::IntLit(1));
        assert_eq!(rest, ".to_s");
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(lit(r#""fmt ""#), Expr::StrLit("fmt ".into()));
        assert_eq!(lit(r#""a\nb\x41""#), Expr::StrLit("a\nbA".into()));
        assert_eq!(lit(r#"'single'"#), Expr::StrLit("single".into()));
        assert_eq!(lit(r#""""#), Expr::StrLit(String::new()));
    }

    #[test]
    fn booleans_respect_word_boundaries() {
        assert_eq!(lit("true"), Expr::BoolLit(true));
        assert!(matches!(parse_literal("truelove"), Err(_) | Ok((_, Expr::StrLit(_)))));
        let r = parse_boolean("truelove");
        assert!(r.is_err());
    }
}
