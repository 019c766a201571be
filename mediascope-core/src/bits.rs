//! Bit-level cursor shared by every codec header decoder.
//!
//! Reads are MSB-first and advance one bit at a time. A read that would run
//! past the end of the buffer fails with [`BitstreamError::Truncated`] and
//! leaves the cursor where it was.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitstreamError {
    #[error("Truncated: needed {needed} bits, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("Sync word not found")]
    NoSync,
    #[error("Reserved or out-of-table value in {0}")]
    Reserved(&'static str),
    #[error("Marker bit missing in {0}")]
    Marker(&'static str),
    #[error("Expected exactly one frame, {0} trailing bytes")]
    MultipleFrames(usize),
}

pub type BitResult<T> = Result<T, BitstreamError>;

#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn bit_position(&self) -> usize {
        self.pos
    }

    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    fn ensure(&self, n: usize) -> BitResult<()> {
        let available = self.bits_left();
        if n > available {
            return Err(BitstreamError::Truncated { needed: n, available });
        }
        Ok(())
    }

    /// Read up to 32 bits.
    pub fn read_bits(&mut self, n: u32) -> BitResult<u32> {
        debug_assert!(n <= 32);
        Ok(self.read_bits_u64(n.min(32))? as u32)
    }

    /// Read up to 64 bits.
    pub fn read_bits_u64(&mut self, n: u32) -> BitResult<u64> {
        let n = n.min(64) as usize;
        self.ensure(n)?;
        let mut value = 0u64;
        for _ in 0..n {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u64;
            self.pos += 1;
        }
        Ok(value)
    }

    pub fn read_bool(&mut self) -> BitResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_u8(&mut self, n: u32) -> BitResult<u8> {
        Ok(self.read_bits(n.min(8))? as u8)
    }

    pub fn read_u16(&mut self, n: u32) -> BitResult<u16> {
        Ok(self.read_bits(n.min(16))? as u16)
    }

    pub fn skip(&mut self, n: usize) -> BitResult<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Consume a marker bit that must be set.
    pub fn marker(&mut self, what: &'static str) -> BitResult<()> {
        if self.read_bool()? {
            Ok(())
        } else {
            Err(BitstreamError::Marker(what))
        }
    }

    /// Read `n` bits only when `present` is set.
    pub fn read_if(&mut self, present: bool, n: u32) -> BitResult<Option<u32>> {
        if present {
            Ok(Some(self.read_bits(n)?))
        } else {
            Ok(None)
        }
    }

    pub fn peek_bits(&self, n: u32) -> BitResult<u32> {
        self.clone().read_bits(n)
    }

    pub fn byte_align(&mut self) {
        let rem = self.pos % 8;
        if rem != 0 {
            self.pos = (self.pos + 8 - rem).min(self.data.len() * 8);
        }
    }
}

// ============================================================================
// Byte helpers
// ============================================================================

/// Offset of the next `00 00 01` prefix at or after `from`.
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    let mut i = from;
    while i + 2 < data.len() {
        if data[i + 2] > 1 {
            i += 3;
        } else if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some(i);
        } else {
            i += 1;
        }
    }
    None
}

/// Default cap on one start-code unit held while waiting for the next code.
pub const MAX_UNIT: usize = 1024 * 1024;

/// Splits a byte stream into start-code delimited units across `feed` calls.
/// Units are handed over as (code byte, bytes after the 4-byte start code).
#[derive(Debug, Clone)]
pub struct UnitSplitter {
    carry: Vec<u8>,
    max_unit: usize,
}

impl Default for UnitSplitter {
    fn default() -> Self {
        Self::new(MAX_UNIT)
    }
}

impl UnitSplitter {
    pub fn new(max_unit: usize) -> Self {
        Self {
            carry: Vec::new(),
            max_unit,
        }
    }

    pub fn feed<F: FnMut(u8, &[u8])>(&mut self, chunk: &[u8], mut on_unit: F) {
        self.carry.extend_from_slice(chunk);
        let carry = &self.carry;
        let mut keep_from = carry.len().saturating_sub(3);
        let mut pos = 0usize;
        while let Some(start) = find_start_code(carry, pos) {
            if start + 4 > carry.len() {
                keep_from = start;
                break;
            }
            match find_start_code(carry, start + 4) {
                Some(next) => {
                    on_unit(carry[start + 3], &carry[start + 4..next]);
                    pos = next;
                }
                None => {
                    keep_from = start;
                    if carry.len() - start > self.max_unit {
                        tracing::debug!("unit over {} bytes, parsing head only", self.max_unit);
                        on_unit(carry[start + 3], &carry[start + 4..]);
                        keep_from = carry.len().saturating_sub(3);
                    }
                    break;
                }
            }
        }
        let keep_from = keep_from.min(self.carry.len());
        self.carry.drain(..keep_from);
    }

    /// Hand over the unit still held, if any.
    pub fn flush<F: FnMut(u8, &[u8])>(&mut self, mut on_unit: F) {
        let carry = std::mem::take(&mut self.carry);
        if let Some(start) = find_start_code(&carry, 0) {
            if start + 4 <= carry.len() {
                on_unit(carry[start + 3], &carry[start + 4..]);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Strip `00 00 03` emulation prevention bytes.
pub fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

// ============================================================================
// Test fixtures
// ============================================================================

/// MSB-first bit packer used to build synthetic headers in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

#[cfg(test)]
impl BitWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&mut self, n: u32, value: u64) -> &mut Self {
        for i in (0..n).rev() {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            let last = self.bytes.len() - 1;
            self.bytes[last] |= bit << (7 - (self.bits % 8));
            self.bits += 1;
        }
        self
    }

    pub(crate) fn put_bytes(&mut self, data: &[u8]) -> &mut Self {
        for &b in data {
            self.put(8, b as u64);
        }
        self
    }

    pub(crate) fn bit_len(&self) -> usize {
        self.bits
    }

    /// Zero-pad to `len` bytes (or to the next byte boundary if smaller).
    pub(crate) fn finish_padded(&self, len: usize) -> Vec<u8> {
        let mut out = self.bytes.clone();
        if out.len() < len {
            out.resize(len, 0);
        }
        out
    }

    pub(crate) fn finish(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}
