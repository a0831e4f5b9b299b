//! Binary buffer reader with cursor tracking.

use std::str;

use crate::BufferError;

/// A reader over a borrowed byte slice.
///
/// Every read checks the remaining length and fails with
/// [`BufferError::EndOfBuffer`] on truncated input.
///
/// ```
/// use json_crdt_buffers::Reader;
///
/// let data = [0x01, 0x02, 0x03];
/// let mut reader = Reader::new(&data);
/// assert_eq!(reader.u8().unwrap(), 0x01);
/// assert_eq!(reader.u16().unwrap(), 0x0203);
/// assert!(reader.u8().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    pub uint8: &'a [u8],
    /// Current cursor position.
    pub x: usize,
}

impl<'a> Reader<'a> {
    pub fn new(uint8: &'a [u8]) -> Self {
        Self { uint8, x: 0 }
    }

    /// Number of bytes left to read.
    pub fn size(&self) -> usize {
        self.uint8.len() - self.x
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the next byte without advancing.
    pub fn peek(&self) -> Result<u8, BufferError> {
        self.uint8.get(self.x).copied().ok_or(BufferError::EndOfBuffer {
            offset: self.x,
            needed: 1,
        })
    }

    /// Returns the next `size` bytes and advances past them.
    pub fn buf(&mut self, size: usize) -> Result<&'a [u8], BufferError> {
        let x = self.x;
        let end = x.checked_add(size).filter(|&end| end <= self.uint8.len());
        match end {
            Some(end) => {
                self.x = end;
                Ok(&self.uint8[x..end])
            }
            None => Err(BufferError::EndOfBuffer {
                offset: x,
                needed: size,
            }),
        }
    }

    #[inline]
    pub fn u8(&mut self) -> Result<u8, BufferError> {
        let byte = self.peek()?;
        self.x += 1;
        Ok(byte)
    }

    pub fn u16(&mut self) -> Result<u16, BufferError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, BufferError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, BufferError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32, BufferError> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64, BufferError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// Reads `size` bytes as a UTF-8 string.
    pub fn utf8(&mut self, size: usize) -> Result<&'a str, BufferError> {
        let offset = self.x;
        let bytes = self.buf(size)?;
        str::from_utf8(bytes).map_err(|_| BufferError::InvalidUtf8 { offset })
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.buf(N)?);
        Ok(out)
    }
}
