//! # Byte Cursor
//!
//! Little-endian reader over a byte slice, used by the row and schema
//! codecs. Every read checks the remaining length and fails with a
//! `Corrupt` error naming what was being read, so a truncated blob never
//! panics.
//!
//! Writing needs no cursor: encoders append to a `Vec<u8>` through
//! [`put_u16`], [`put_u32`] and friends.

use eyre::{bail, Result};

use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            bail!(StorageError::Corrupt(format!(
                "truncated {}: need {} bytes at {}, {} left",
                what,
                len,
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.bytes(N, what)?);
        Ok(raw)
    }

    pub fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    pub fn u16(&mut self, what: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    pub fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    pub fn u64(&mut self, what: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array(what)?))
    }

    pub fn f64(&mut self, what: &str) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array(what)?))
    }

    /// Reads a `u16` length followed by that many UTF-8 bytes.
    pub fn string16(&mut self, what: &str) -> Result<String> {
        let len = self.u16(what)? as usize;
        let bytes = self.bytes(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StorageError::Corrupt(format!("{} is not valid UTF-8", what)).into())
    }
}

pub fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_f64(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Writes a `u16` length and the bytes of `value`.
///
/// # Panics
///
/// If `value` is longer than `u16::MAX` bytes. Names are validated before
/// they reach the encoder.
pub fn put_string16(buf: &mut Vec<u8>, value: &str) {
    let len = u16::try_from(value.len()).unwrap_or_else(|_| {
        panic!("string of {} bytes does not fit a 16-bit length", value.len())
    });
    put_u16(buf, len);
    buf.extend_from_slice(value.as_bytes());
}
