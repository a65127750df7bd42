//! Byte streams for the bundle format
//!
//! All fixed-width integers are little-endian. Compact integers are
//! unsigned LEB128; signed compact integers are zig-zag encoded first.

use std::sync::Arc;

use crate::utils::error::DecodeError;

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Cursor over shared, immutable bundle bytes. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct InputStream {
    data: Arc<[u8]>,
    offset: usize,
}

impl InputStream {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    /// Move the cursor to an absolute position
    pub fn seek(&mut self, offset: usize) -> DecodeResult<()> {
        if offset > self.data.len() {
            return Err(DecodeError::ShortRead {
                offset,
                wanted: 0,
            });
        }
        self.offset = offset;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> DecodeResult<()> {
        self.take(count).map(|_| ())
    }

    fn take(&mut self, count: usize) -> DecodeResult<&[u8]> {
        let end = self
            .offset
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::ShortRead {
                offset: self.offset,
                wanted: count,
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> DecodeResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> DecodeResult<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_compact_u64(&mut self) -> DecodeResult<u64> {
        let start = self.offset;
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(DecodeError::Invalid(format!(
                    "compact integer overflow at offset {}",
                    start
                )));
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    pub fn read_compact_u32(&mut self) -> DecodeResult<u32> {
        let value = self.read_compact_u64()?;
        u32::try_from(value)
            .map_err(|_| DecodeError::Invalid(format!("compact u32 out of range: {}", value)))
    }

    pub fn read_compact_s32(&mut self) -> DecodeResult<i32> {
        let raw = self.read_compact_u32()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    /// Length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> DecodeResult<String> {
        let len = self.read_compact_u32()? as usize;
        let offset = self.offset;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DecodeError::Invalid(format!("invalid utf-8 string at offset {}", offset)))
    }

    pub fn read_bytes(&mut self, count: usize) -> DecodeResult<Vec<u8>> {
        Ok(self.take(count)?.to_vec())
    }
}

/// Growable output buffer mirroring `InputStream`
#[derive(Debug, Clone, Default)]
pub struct OutputStream {
    buf: Vec<u8>,
}

impl OutputStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Overwrite four bytes at `pos`
    pub fn patch_u32(&mut self, pos: usize, value: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn write_compact_u64(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_compact_u32(&mut self, value: u32) {
        self.write_compact_u64(u64::from(value));
    }

    pub fn write_compact_s32(&mut self, value: i32) {
        self.write_compact_u32(((value << 1) ^ (value >> 31)) as u32);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_compact_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stream(out: OutputStream) -> InputStream {
        InputStream::new(out.into_inner())
    }

    #[test]
    fn test_fixed_width_little_endian() {
        let mut out = OutputStream::new();
        out.write_u32(0x0102_0304);
        assert_eq!(out.as_slice(), &[4, 3, 2, 1]);
        let mut input = stream(out);
        assert_eq!(input.read_u32().unwrap(), 0x0102_0304);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_compact_known_encodings() {
        let mut out = OutputStream::new();
        out.write_compact_u32(300);
        assert_eq!(out.as_slice(), &[0xac, 0x02]);

        let mut out = OutputStream::new();
        out.write_compact_s32(-1);
        assert_eq!(out.as_slice(), &[0x01]);
    }

    #[test]
    fn test_short_read() {
        let mut input = InputStream::new(vec![1u8, 2]);
        let err = input.read_u32().unwrap_err();
        assert_eq!(err, DecodeError::ShortRead { offset: 0, wanted: 4 });
    }

    #[test]
    fn test_truncated_string() {
        let mut out = OutputStream::new();
        out.write_compact_u32(10);
        out.write_bytes(b"abc");
        assert!(stream(out).read_string().is_err());
    }

    #[test]
    fn test_seek_bounds() {
        let mut input = InputStream::new(vec![0u8; 4]);
        assert!(input.seek(4).is_ok());
        assert!(input.seek(5).is_err());
    }

    proptest! {
        #[test]
        fn prop_compact_s32(value in any::<i32>()) {
            let mut out = OutputStream::new();
            out.write_compact_s32(value);
            prop_assert_eq!(stream(out).read_compact_s32().unwrap(), value);
        }

        #[test]
        fn prop_string(value in ".*") {
            let mut out = OutputStream::new();
            out.write_string(&value);
            prop_assert_eq!(stream(out).read_string().unwrap(), value);
        }
    }
}
