//! Random-access byte stream over a shared input buffer.
//!
//! A [`ByteStream`] is a cursor over a refcounted [`Bytes`] buffer. Bounded
//! substreams share the underlying storage and carry independent cursors, so
//! slicing a field's extent out of its enclosing stream never copies.

use bytes::Bytes;

use crate::error::ParseErrorKind;

/// Byte order for multi-byte primitive reads. Every such read takes the
/// endianness explicitly; the stream itself holds no byte-order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Le,
    Be,
}

#[derive(Debug, Clone)]
pub struct ByteStream {
    data: Bytes,
    pos: usize,
}

impl ByteStream {
    pub fn new(data: impl Into<Bytes>) -> ByteStream {
        ByteStream {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Move the cursor to an absolute offset. Seeking past the end is
    /// permitted; the subsequent read reports `EndOfStream`.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn ensure(&self, needed: usize) -> Result<(), ParseErrorKind> {
        if self.remaining() < needed {
            Err(ParseErrorKind::EndOfStream {
                needed,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    /// Read exactly `n` bytes as a zero-copy slice of the backing buffer.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, ParseErrorKind> {
        self.ensure(n)?;
        let out = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(out)
    }

    /// Read everything from the cursor to the end of the stream.
    pub fn read_bytes_full(&mut self) -> Bytes {
        let start = self.pos.min(self.data.len());
        let out = self.data.slice(start..);
        self.pos = self.data.len();
        out
    }

    /// Read up to the terminator byte `term`.
    ///
    /// `include` keeps the terminator in the returned slice, `consume`
    /// advances the cursor past it either way. When the terminator is not
    /// found before end of stream, `eos_error` selects between failing and
    /// returning the remaining bytes.
    pub fn read_bytes_term(
        &mut self,
        term: u8,
        include: bool,
        consume: bool,
        eos_error: bool,
    ) -> Result<Bytes, ParseErrorKind> {
        let rest = self.data.get(self.pos..).unwrap_or(&[]);
        match rest.iter().position(|&b| b == term) {
            Some(idx) => {
                let end = self.pos + idx + usize::from(include);
                let out = self.data.slice(self.pos..end);
                self.pos += idx + usize::from(consume);
                Ok(out)
            }
            None if eos_error => Err(ParseErrorKind::EndOfStream {
                needed: 1,
                available: 0,
            }),
            None => Ok(self.read_bytes_full()),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ParseErrorKind> {
        self.ensure(N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(buf)
    }

    pub fn read_u1(&mut self) -> Result<u8, ParseErrorKind> {
        Ok(u8::from_le_bytes(self.read_array::<1>()?))
    }

    pub fn read_u2(&mut self, endian: Endian) -> Result<u16, ParseErrorKind> {
        let b = self.read_array::<2>()?;
        Ok(match endian {
            Endian::Le => u16::from_le_bytes(b),
            Endian::Be => u16::from_be_bytes(b),
        })
    }

    pub fn read_u4(&mut self, endian: Endian) -> Result<u32, ParseErrorKind> {
        let b = self.read_array::<4>()?;
        Ok(match endian {
            Endian::Le => u32::from_le_bytes(b),
            Endian::Be => u32::from_be_bytes(b),
        })
    }

    pub fn read_u8(&mut self, endian: Endian) -> Result<u64, ParseErrorKind> {
        let b = self.read_array::<8>()?;
        Ok(match endian {
            Endian::Le => u64::from_le_bytes(b),
            Endian::Be => u64::from_be_bytes(b),
        })
    }

    pub fn read_s1(&mut self) -> Result<i8, ParseErrorKind> {
        Ok(i8::from_le_bytes(self.read_array::<1>()?))
    }

    pub fn read_s2(&mut self, endian: Endian) -> Result<i16, ParseErrorKind> {
        let b = self.read_array::<2>()?;
        Ok(match endian {
            Endian::Le => i16::from_le_bytes(b),
            Endian::Be => i16::from_be_bytes(b),
        })
    }

    pub fn read_s4(&mut self, endian: Endian) -> Result<i32, ParseErrorKind> {
        let b = self.read_array::<4>()?;
        Ok(match endian {
            Endian::Le => i32::from_le_bytes(b),
            Endian::Be => i32::from_be_bytes(b),
        })
    }

    pub fn read_s8(&mut self, endian: Endian) -> Result<i64, ParseErrorKind> {
        let b = self.read_array::<8>()?;
        Ok(match endian {
            Endian::Le => i64::from_le_bytes(b),
            Endian::Be => i64::from_be_bytes(b),
        })
    }

    pub fn read_f4(&mut self, endian: Endian) -> Result<f32, ParseErrorKind> {
        let b = self.read_array::<4>()?;
        Ok(match endian {
            Endian::Le => f32::from_le_bytes(b),
            Endian::Be => f32::from_be_bytes(b),
        })
    }

    pub fn read_f8(&mut self, endian: Endian) -> Result<f64, ParseErrorKind> {
        let b = self.read_array::<8>()?;
        Ok(match endian {
            Endian::Le => f64::from_le_bytes(b),
            Endian::Be => f64::from_be_bytes(b),
        })
    }

    /// A bounded view over `[offset, offset + len)` of this stream, with an
    /// independent cursor starting at 0. The backing buffer is shared.
    pub fn substream(&self, offset: usize, len: usize) -> Result<ByteStream, ParseErrorKind> {
        if offset + len > self.data.len() {
            return Err(ParseErrorKind::EndOfStream {
                needed: offset + len - self.data.len(),
                available: 0,
            });
        }
        Ok(ByteStream {
            data: self.data.slice(offset..offset + len),
            pos: 0,
        })
    }
}
