//! Big-endian bit cursor over a byte buffer.
//!
//! [`BitReader`] wraps [`bitstream_io::BitReader`] and adds the
//! Exp-Golomb codes codec parameter sets are written in. Reads are checked
//! against the bits left before they reach the inner reader, so a
//! truncated header yields `None` and the cursor stays where it was.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use bitstream_io::{BigEndian, BitRead, BitReader as InnerReader};

/// Bit-level reader over a borrowed byte slice.
pub struct BitReader<'a> {
    inner: InnerReader<&'a [u8], BigEndian>,
    len_bits: usize,
    consumed: usize,
}

impl Debug for BitReader<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BitReader")
            .field("len_bits", &self.len_bits)
            .field("consumed", &self.consumed)
            .finish()
    }
}

impl<'a> BitReader<'a> {
    /// Start reading at the first bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            inner: InnerReader::endian(data, BigEndian),
            len_bits: data.len() * 8,
            consumed: 0,
        }
    }

    /// Read a single bit.
    pub fn read_bit(&mut self) -> Option<u32> {
        self.read_flag().map(u32::from)
    }

    /// Read a boolean flag.
    pub fn read_flag(&mut self) -> Option<bool> {
        if self.remaining_bits() == 0 {
            return None;
        }
        let bit = self.inner.read_bit().ok()?;
        self.consumed += 1;
        Some(bit)
    }

    /// Read `n` bits (up to 32) as an unsigned value.
    pub fn read_bits(&mut self, n: u8) -> Option<u32> {
        if n > 32 || n as usize > self.remaining_bits() {
            return None;
        }
        if n == 0 {
            return Some(0);
        }
        let value = self.inner.read::<u32>(u32::from(n)).ok()?;
        self.consumed += n as usize;
        Some(value)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bits(8).map(|value| value as u8)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bits(32)
    }

    /// Skip `n` bits.
    pub fn skip_bits(&mut self, n: usize) -> Option<()> {
        if n > self.remaining_bits() {
            return None;
        }
        self.inner.skip(u32::try_from(n).ok()?).ok()?;
        self.consumed += n;
        Some(())
    }

    /// Read an unsigned Exp-Golomb code (`ue(v)`).
    ///
    /// Prefixes longer than 31 zeros do not fit a `u32` and yield `None`.
    pub fn read_ue(&mut self) -> Option<u32> {
        let mut leading_zeros = 0u8;
        while !self.read_flag()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return None;
            }
        }
        let suffix = u64::from(self.read_bits(leading_zeros)?);
        u32::try_from((1u64 << leading_zeros) - 1 + suffix).ok()
    }

    /// Read a signed Exp-Golomb code (`se(v)`).
    pub fn read_se(&mut self) -> Option<i32> {
        let code = i64::from(self.read_ue()?);
        let magnitude = (code + 1) / 2;
        let value = if code % 2 == 0 { -magnitude } else { magnitude };
        i32::try_from(value).ok()
    }

    /// Current position in bits from the start of the buffer.
    pub fn position(&self) -> usize {
        self.consumed
    }

    /// Number of bits left to read.
    pub fn remaining_bits(&self) -> usize {
        self.len_bits - self.consumed
    }
}
