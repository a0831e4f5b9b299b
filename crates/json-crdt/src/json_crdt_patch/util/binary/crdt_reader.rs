use json_crdt_buffers::Reader;

use crate::json_crdt_patch::codec::DecodeError;

/// Reads what [`CrdtWriter`](super::CrdtWriter) writes. Truncated input and
/// values beyond an encoding's domain are errors.
#[derive(Debug, Clone)]
pub struct CrdtReader<'a> {
    pub inner: Reader<'a>,
}

impl<'a> CrdtReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            inner: Reader::new(data),
        }
    }

    /// Current read offset.
    pub fn x(&self) -> usize {
        self.inner.x
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.inner.u8()?)
    }

    pub fn buf(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        Ok(self.inner.buf(len)?)
    }

    pub fn utf8(&mut self, len: usize) -> Result<&'a str, DecodeError> {
        Ok(self.inner.utf8(len)?)
    }

    /// Reads a table-relative id as `(x, y)`.
    pub fn id(&mut self) -> Result<(u64, u64), DecodeError> {
        let byte = self.inner.peek()?;
        if byte & 0x80 == 0 {
            self.inner.u8()?;
            return Ok(((byte >> 4) as u64, (byte & 0b1111) as u64));
        }
        let (_, x) = self.b1vu28()?;
        let y = self.vu57()?;
        Ok((x, y))
    }

    pub fn vu57(&mut self) -> Result<u64, DecodeError> {
        self.vu(8, super::VU57_MAX)
    }

    pub fn vu39(&mut self) -> Result<u64, DecodeError> {
        self.vu(6, super::VU39_MAX)
    }

    /// Returns `(flag, value)`.
    pub fn b1vu28(&mut self) -> Result<(u8, u64), DecodeError> {
        self.b1vu(4, super::VU28_MAX)
    }

    /// Returns `(flag, value)`.
    pub fn b1vu56(&mut self) -> Result<(u8, u64), DecodeError> {
        self.b1vu(8, super::VU56_MAX)
    }

    /// Returns `(x, z)`.
    pub fn u53vu39(&mut self) -> Result<(u64, u64), DecodeError> {
        let high = self.inner.u32()? as u64;
        let mid = self.inner.u16()? as u64;
        let low = self.inner.u8()?;
        let x = (high << 21) | (mid << 5) | (low >> 3) as u64;
        let mut z = (low & 0b11) as u64;
        if low & 0b100 != 0 {
            z |= self.vu(6, super::VU39_MAX >> 2)? << 2;
        }
        Ok((x, z))
    }

    fn vu(&mut self, max_bytes: usize, max: u64) -> Result<u64, DecodeError> {
        let mut num = 0u64;
        let mut shift = 0u32;
        for _ in 1..max_bytes {
            let byte = self.inner.u8()?;
            num |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return check(num, max);
            }
            shift += 7;
        }
        let byte = self.inner.u8()?;
        num |= (byte as u64) << shift;
        check(num, max)
    }

    fn b1vu(&mut self, max_bytes: usize, max: u64) -> Result<(u8, u64), DecodeError> {
        let head = self.inner.u8()?;
        let flag = head >> 7;
        let mut num = (head & 0b11_1111) as u64;
        if head & 0x40 != 0 {
            num |= self.vu(max_bytes - 1, max >> 6)? << 6;
        }
        Ok((flag, num))
    }
}

fn check(num: u64, max: u64) -> Result<u64, DecodeError> {
    if num > max {
        Err(DecodeError::VarintOverflow)
    } else {
        Ok(num)
    }
}
