//! Big-endian binary wire primitives for the hot-path packet framing.
//!
//! Layout rules shared by every binary packet:
//! - integers are big-endian, floats are IEEE-754 big-endian
//! - strings are `u16` length followed by UTF-8 bytes
//! - GUIDs are 16 raw bytes
//! - booleans are a single byte, `0` or `1`
//! - variable-size blobs are `u32` length followed by raw bytes

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use super::envelope::PacketType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of frame: needed {needed} more byte(s), {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
    #[error("invalid boolean byte 0x{0:02x}")]
    InvalidBool(u8),
    #[error("unexpected packet type: expected {expected}, found {found}")]
    UnexpectedType { expected: u8, found: u8 },
    #[error("empty frame")]
    EmptyFrame,
    #[error("string field of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),
    #[error("blob field of {0} bytes exceeds the u32 length prefix")]
    BlobTooLong(usize),
}

/// Append-only frame builder.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Start a frame whose first byte is the packet-type ordinal.
    pub fn with_type(packet_type: PacketType) -> Self {
        let mut writer = Self {
            buf: Vec::with_capacity(64),
        };
        writer.put_u8(packet_type as u8);
        writer
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn put_uuid(&mut self, value: Uuid) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// `u16` length prefix + UTF-8 bytes. Fails if the string does not fit.
    pub fn put_str(&mut self, value: &str) -> Result<(), WireError> {
        let len = u16::try_from(value.len()).map_err(|_| WireError::StringTooLong(value.len()))?;
        self.put_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// `u32` length prefix + raw bytes.
    pub fn put_blob(&mut self, value: &[u8]) -> Result<(), WireError> {
        let len = u32::try_from(value.len()).map_err(|_| WireError::BlobTooLong(value.len()))?;
        self.put_u32(len);
        self.buf.extend_from_slice(value);
        Ok(())
    }

    /// Raw bytes with no prefix; the packet layout must make the size implicit.
    pub fn put_raw(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// Cursor over a received frame.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < count {
            return Err(WireError::UnexpectedEof {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Consume and verify the leading packet-type ordinal.
    pub fn expect_type(&mut self, packet_type: PacketType) -> Result<(), WireError> {
        let found = self.get_u8()?;
        if found != packet_type as u8 {
            return Err(WireError::UnexpectedType {
                expected: packet_type as u8,
                found,
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_f32(&mut self) -> Result<f32, WireError> {
        let bytes = self.take(4)?;
        Ok(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(raw))
    }

    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBool(other)),
        }
    }

    pub fn get_uuid(&mut self) -> Result<Uuid, WireError> {
        let bytes = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(raw))
    }

    pub fn get_str(&mut self) -> Result<String, WireError> {
        let len = self.get_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn get_blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    /// Consume everything left in the frame.
    pub fn get_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}
