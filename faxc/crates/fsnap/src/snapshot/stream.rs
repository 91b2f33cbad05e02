//! Byte streams
//!
//! In-memory write and read streams. Fixed-width scalars are little-endian;
//! lengths, ids and class ids are unsigned LEB128; small integers are zigzag
//! LEB128.
//!
//! Every read is bounds-checked and reports the offset it failed at.

use crate::error::{Result, SnapshotError};

/// Maximum bytes for a 64-bit varint (ceil(64/7) = 10)
pub const MAX_VARINT_BYTES: usize = 10;

/// Growable output buffer
#[derive(Debug, Default)]
pub struct WriteStream {
    buf: Vec<u8>,
}

impl WriteStream {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Unsigned LEB128
    pub fn write_uleb(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Length or count as unsigned LEB128
    #[inline]
    pub fn write_len(&mut self, len: usize) {
        self.write_uleb(len as u64);
    }

    /// Zigzag LEB128
    pub fn write_zigzag(&mut self, value: i64) {
        self.write_uleb(((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an input buffer
#[derive(Debug)]
pub struct ReadStream<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ReadStream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Offset of the next unread byte
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    /// Next byte without consuming it
    pub fn peek_u8(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = self
            .peek_u8()
            .ok_or_else(|| SnapshotError::format(self.pos, "unexpected end of stream"))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Borrow the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(SnapshotError::format(
                self.pos,
                format!("{} bytes requested, {} remain", len, self.remaining()),
            ));
        }
        let bytes = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Unsigned LEB128
    pub fn read_uleb(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut result: u64 = 0;
        let mut shift = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            let value = u64::from(byte & 0x7F);
            if i == MAX_VARINT_BYTES - 1 && value > 1 {
                return Err(SnapshotError::format(start, "varint overflows 64 bits"));
            }
            result |= value << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(SnapshotError::format(start, "varint longer than 10 bytes"))
    }

    /// Zigzag LEB128
    pub fn read_zigzag(&mut self) -> Result<i64> {
        let raw = self.read_uleb()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    /// Count of items of at least `min_item_size` bytes each
    ///
    /// Rejects counts the rest of the stream cannot possibly hold, so a
    /// corrupt length never drives a huge allocation.
    pub fn read_len(&mut self, min_item_size: usize) -> Result<usize> {
        let start = self.pos;
        let raw = self.read_uleb()?;
        let len = usize::try_from(raw)
            .map_err(|_| SnapshotError::format(start, "length does not fit usize"))?;
        let needed = len.checked_mul(min_item_size.max(1));
        match needed {
            Some(needed) if min_item_size == 0 || needed <= self.remaining() => Ok(len),
            _ => Err(SnapshotError::format(
                start,
                format!("length {} exceeds the {} remaining bytes", len, self.remaining()),
            )),
        }
    }

    /// Unsigned LEB128 that must fit 32 bits
    pub fn read_u32_leb(&mut self) -> Result<u32> {
        let start = self.pos;
        let raw = self.read_uleb()?;
        u32::try_from(raw).map_err(|_| SnapshotError::format(start, "id does not fit 32 bits"))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let at = self.pos;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SnapshotError::format(at, format!("invalid bool byte {}", other))),
        }
    }
}
