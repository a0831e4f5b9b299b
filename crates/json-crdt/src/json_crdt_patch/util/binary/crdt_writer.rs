use json_crdt_buffers::Writer;

/// A [`Writer`] with the CRDT varint encodings on top.
#[derive(Debug, Clone, Default)]
pub struct CrdtWriter {
    pub inner: Writer,
}

impl CrdtWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alloc_size(size: usize) -> Self {
        Self {
            inner: Writer::with_alloc_size(size),
        }
    }

    #[inline]
    pub fn flush(&mut self) -> Vec<u8> {
        self.inner.flush()
    }

    #[inline]
    pub fn u8(&mut self, val: u8) {
        self.inner.u8(val);
    }

    #[inline]
    pub fn buf(&mut self, data: &[u8]) {
        self.inner.buf(data);
    }

    #[inline]
    pub fn utf8(&mut self, s: &str) -> usize {
        self.inner.utf8(s)
    }

    /// Table-relative id: one byte `0xxxyyyy` when `x <= 7 && y <= 15`,
    /// otherwise `b1vu28(1, x)` followed by `vu57(y)`.
    pub fn id(&mut self, x: u64, y: u64) {
        if x <= 0b111 && y <= 0b1111 {
            self.inner.u8(((x as u8) << 4) | y as u8);
        } else {
            self.b1vu28(1, x);
            self.vu57(y);
        }
    }

    pub fn vu57(&mut self, num: u64) {
        debug_assert!(num <= super::VU57_MAX);
        self.vu(num, 8);
    }

    pub fn vu39(&mut self, num: u64) {
        debug_assert!(num <= super::VU39_MAX);
        self.vu(num, 6);
    }

    pub fn b1vu28(&mut self, flag: u8, num: u64) {
        debug_assert!(num <= super::VU28_MAX);
        self.b1vu(flag, num, 4);
    }

    pub fn b1vu56(&mut self, flag: u8, num: u64) {
        debug_assert!(num <= super::VU56_MAX);
        self.b1vu(flag, num, 8);
    }

    /// Writes a 53-bit `x` and a 39-bit `z` as one unit. `x` takes seven
    /// raw bytes together with the lowest two bits of `z`; the rest of `z`
    /// follows as `vu` bytes only when it does not fit those two bits.
    ///
    /// ```text
    /// xxxxxxxx xxxxxxxx xxxxxxxx xxxxxxxx | xxxxxxxx xxxxxxxx | xxxxx?zz | ...
    /// ```
    pub fn u53vu39(&mut self, x: u64, z: u64) {
        debug_assert!(x <= super::U53_MAX);
        debug_assert!(z <= super::VU39_MAX);
        self.inner.u32((x >> 21) as u32);
        self.inner.u16(((x >> 5) & 0xffff) as u16);
        let low = ((x & 0b1_1111) as u8) << 3;
        if z <= 0b11 {
            self.inner.u8(low | z as u8);
        } else {
            self.inner.u8(low | 0b100 | (z & 0b11) as u8);
            self.vu(z >> 2, 6);
        }
    }

    /// `max_bytes - 1` groups of 7 bits with a continuation bit, then a
    /// final byte that carries 8 bits.
    fn vu(&mut self, mut num: u64, max_bytes: usize) {
        for _ in 1..max_bytes {
            if num <= 0x7f {
                self.inner.u8(num as u8);
                return;
            }
            self.inner.u8(0x80 | (num & 0x7f) as u8);
            num >>= 7;
        }
        self.inner.u8(num as u8);
    }

    fn b1vu(&mut self, flag: u8, num: u64, max_bytes: usize) {
        let head = if flag != 0 { 0x80 } else { 0 };
        if num <= 0b11_1111 {
            self.inner.u8(head | num as u8);
        } else {
            self.inner.u8(head | 0x40 | (num & 0b11_1111) as u8);
            self.vu(num >> 6, max_bytes - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(f: impl FnOnce(&mut CrdtWriter)) -> Vec<u8> {
        let mut w = CrdtWriter::new();
        f(&mut w);
        w.flush()
    }

    #[test]
    fn vu57_layout() {
        assert_eq!(bytes(|w| w.vu57(0)), vec![0x00]);
        assert_eq!(bytes(|w| w.vu57(127)), vec![0x7f]);
        assert_eq!(bytes(|w| w.vu57(128)), vec![0x80, 0x01]);
        assert_eq!(bytes(|w| w.vu57(super::super::VU57_MAX)).len(), 8);
        assert_eq!(bytes(|w| w.vu57(super::super::VU57_MAX)), vec![0xff; 8]);
    }

    #[test]
    fn vu39_fits_six_bytes() {
        assert_eq!(bytes(|w| w.vu39(super::super::VU39_MAX)).len(), 6);
        assert_eq!(bytes(|w| w.vu39(300)), vec![0xac, 0x02]);
    }

    #[test]
    fn b1vu_layout() {
        assert_eq!(bytes(|w| w.b1vu56(0, 5)), vec![0x05]);
        assert_eq!(bytes(|w| w.b1vu56(1, 5)), vec![0x85]);
        assert_eq!(bytes(|w| w.b1vu56(1, 64)), vec![0xc0, 0x01]);
        assert_eq!(bytes(|w| w.b1vu28(1, super::super::VU28_MAX)).len(), 4);
        assert_eq!(bytes(|w| w.b1vu56(0, super::super::VU56_MAX)).len(), 8);
    }

    #[test]
    fn id_single_byte() {
        assert_eq!(bytes(|w| w.id(7, 15)), vec![0x7f]);
        assert_eq!(bytes(|w| w.id(0, 0)), vec![0x00]);
        assert_eq!(bytes(|w| w.id(8, 0)), vec![0x88, 0x00]);
        assert_eq!(bytes(|w| w.id(1, 16)), vec![0x81, 0x10]);
    }

    #[test]
    fn u53vu39_common_case_is_seven_bytes() {
        assert_eq!(bytes(|w| w.u53vu39(super::super::U53_MAX, 3)).len(), 7);
        assert_eq!(bytes(|w| w.u53vu39(1, 4)).len(), 8);
        assert_eq!(bytes(|w| w.u53vu39(1, 2)), vec![0, 0, 0, 0, 0, 0, 0b0000_1010]);
    }
}
