use crate::error::DecodeError;

/// Bytes is a bounds-checked big-endian reader over a borrowed buffer.
///
/// Every read either returns the requested value and advances the offset, or
/// returns [`DecodeError::NotEnoughData`] and leaves the offset untouched. Values
/// are always decoded as big-endian regardless of the host.
#[derive(Debug, Clone)]
pub struct Bytes<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Bytes<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Bytes { buf, offset: 0 }
    }

    /// Number of bytes consumed so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Borrow the next `n` bytes and advance past them.
    ///
    /// # Errors
    /// [`DecodeError::NotEnoughData`] if fewer than `n` bytes remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::NotEnoughData {
                offset: self.offset,
                wanted: n,
                available: self.remaining(),
            });
        }
        let dat = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(dat)
    }

    /// Advance past `n` bytes.
    ///
    /// # Errors
    /// [`DecodeError::NotEnoughData`] if fewer than `n` bytes remain.
    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// # Errors
    /// [`DecodeError::NotEnoughData`] at the end of the buffer.
    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    /// # Errors
    /// [`DecodeError::NotEnoughData`] at the end of the buffer.
    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    /// Unsigned 24-bit integer.
    ///
    /// # Errors
    /// [`DecodeError::NotEnoughData`] at the end of the buffer.
    pub fn u24(&mut self) -> Result<u32, DecodeError> {
        let b: [u8; 3] = self.array()?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    /// # Errors
    /// [`DecodeError::NotEnoughData`] at the end of the buffer.
    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// # Errors
    /// [`DecodeError::NotEnoughData`] at the end of the buffer.
    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            0x01,
            0x02, 0x03,
            0x04, 0x05, 0x06,
            0x07, 0x08, 0x09, 0x0a,
            0xff, 0xff, 0xff, 0xfe,
        ];
        let mut bytes = Bytes::new(dat);

        assert_eq!(bytes.u8().unwrap(), 0x01);
        assert_eq!(bytes.u16().unwrap(), 0x0203);
        assert_eq!(bytes.u24().unwrap(), 0x04_0506);
        assert_eq!(bytes.u32().unwrap(), 0x0708_090a);
        assert_eq!(bytes.i32().unwrap(), -2);
        assert_eq!(bytes.offset(), dat.len());
        assert_eq!(bytes.remaining(), 0);
    }

    #[test]
    fn short_read_does_not_advance() {
        let dat: &[u8] = &[0x01, 0x02, 0x03];
        let mut bytes = Bytes::new(dat);
        bytes.u8().unwrap();

        let err = bytes.u32().unwrap_err();
        assert_eq!(
            err,
            DecodeError::NotEnoughData {
                offset: 1,
                wanted: 4,
                available: 2
            }
        );
        assert_eq!(bytes.offset(), 1, "failed read should not move the offset");
        assert_eq!(bytes.u16().unwrap(), 0x0203);
    }

    #[test]
    fn take_and_skip() {
        let dat: &[u8] = &[1, 2, 3, 4, 5, 6];
        let mut bytes = Bytes::new(dat);

        assert_eq!(bytes.take(2).unwrap(), &[1, 2]);
        bytes.skip(3).unwrap();
        assert_eq!(bytes.offset(), 5);
        assert!(bytes.skip(2).is_err());
        assert_eq!(bytes.take(1).unwrap(), &[6]);
    }
}
