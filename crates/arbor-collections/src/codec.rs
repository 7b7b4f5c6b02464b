//! Variable-byte encoding for persisted collection records.
//!
//! Integers are written as little-endian base-128 varints (7 payload bits
//! per byte, high bit set on every byte but the last). Strings are a varint
//! byte length followed by UTF-8.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DbError, Result};

/// Encoder for collection and permission records.
pub struct VariableByteOutput {
    buf: BytesMut,
}

impl VariableByteOutput {
    /// Creates a new, empty encoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Writes a single raw byte.
    pub fn write_byte(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Writes a 32-bit integer as a varint of its unsigned bit pattern.
    pub fn write_int(&mut self, v: i32) {
        self.write_varint(v as u32 as u64);
    }

    /// Writes a 64-bit integer as a varint of its unsigned bit pattern.
    pub fn write_long(&mut self, v: i64) {
        self.write_varint(v as u64);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_utf(&mut self, s: &str) {
        self.write_varint(s.len() as u64);
        self.buf.put_slice(s.as_bytes());
    }

    fn write_varint(&mut self, mut v: u64) {
        while v & !0x7F != 0 {
            self.buf.put_u8((v as u8 & 0x7F) | 0x80);
            v >>= 7;
        }
        self.buf.put_u8(v as u8);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for VariableByteOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder matching [`VariableByteOutput`].
pub struct VariableByteInput {
    buf: Bytes,
    pos: usize,
}

impl VariableByteInput {
    /// Creates a decoder over encoded bytes.
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    fn ensure_available(&self, len: usize) -> Result<()> {
        if self.pos + len > self.buf.len() {
            return Err(DbError::Codec("truncated data".to_string()));
        }
        Ok(())
    }

    /// Reads one raw byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        self.ensure_available(1)?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_varint(&mut self, max_bits: u32) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let b = self.read_byte()?;
            if shift >= max_bits {
                return Err(DbError::Codec("varint overflow".to_string()));
            }
            result |= ((b & 0x7F) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Reads a varint-encoded `i32`.
    pub fn read_int(&mut self) -> Result<i32> {
        let v = self.read_varint(32)?;
        if v > u32::MAX as u64 {
            return Err(DbError::Codec("int varint out of range".to_string()));
        }
        Ok(v as u32 as i32)
    }

    /// Reads a varint-encoded `i64`.
    pub fn read_long(&mut self) -> Result<i64> {
        Ok(self.read_varint(64)? as i64)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_utf(&mut self) -> Result<String> {
        let len = self.read_varint(32)? as usize;
        self.ensure_available(len)?;
        let raw = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        String::from_utf8(raw.to_vec())
            .map_err(|e| DbError::Codec(format!("invalid UTF-8 string: {}", e)))
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
