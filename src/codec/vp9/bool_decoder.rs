// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A VP9 boolean decoder, as used by the compressed header.
//!
//! The implementation keeps a 64-bit window of the coded value and refills it
//! a byte at a time, in the same way libvpx does. Reads past the end of the
//! buffer see zero bits, as the VP9 specification requires.

use thiserror::Error;

const LOTS_OF_BITS: isize = 0x4000_0000;
const U8_BITS: isize = u8::BITS as isize;
const BD_VALUE_SIZE: isize = u64::BITS as isize;

/// Some bits are "encoded" with a 50/50 probability.
const DEFAULT_PROBABILITY: u8 = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoolDecoderError {
    #[error("the boolean coded partition is empty")]
    NoData,
    #[error("the boolean decoder ran out of bits")]
    EndOfData,
    #[error("the marker bit of the boolean coded partition is set")]
    InvalidMarkerBit,
    #[error("failed to convert read input to target type")]
    ConversionFailed,
}

pub type BoolDecoderResult<T> = std::result::Result<T, BoolDecoderError>;

/// The decoder state.
pub struct BoolDecoder<'a> {
    data: &'a [u8],
    /// Index of the next byte of `data` to be shifted into `value`.
    next_byte: usize,
    range: u32,
    value: u64,
    /// Number of bits in `value` beyond the 8 currently being decoded.
    count: isize,
}

impl<'a> BoolDecoder<'a> {
    /// Creates a decoder over `data` and consumes the marker bit, which must be
    /// zero.
    pub fn new(data: &'a [u8]) -> BoolDecoderResult<Self> {
        if data.is_empty() {
            return Err(BoolDecoderError::NoData);
        }

        let mut bd = Self {
            data,
            next_byte: 0,
            range: 255,
            value: 0,
            count: -U8_BITS,
        };

        bd.fill()?;

        if bd.read_bool()? {
            return Err(BoolDecoderError::InvalidMarkerBit);
        }

        Ok(bd)
    }

    /// Fills more bits from `data` into `value`, keeping at least 8 bits of the
    /// coded value available.
    fn fill(&mut self) -> BoolDecoderResult<()> {
        let mut shift = BD_VALUE_SIZE - U8_BITS - (self.count + U8_BITS);
        let bits_left = ((self.data.len() - self.next_byte) as isize) * U8_BITS;
        let x = shift + U8_BITS - bits_left;
        let mut loop_end = 0;

        if x >= 0 {
            self.count += LOTS_OF_BITS;
            loop_end = x;
        }

        if x < 0 || bits_left != 0 {
            while shift >= loop_end {
                self.count += U8_BITS;
                self.value |= u64::from(self.data[self.next_byte]) << shift;
                self.next_byte += 1;
                shift -= U8_BITS;
            }
            Ok(())
        } else {
            Err(BoolDecoderError::EndOfData)
        }
    }

    /// Reads a boolean whose probability of being false is `probability / 256`.
    pub fn read_bool_with_prob(&mut self, probability: u8) -> BoolDecoderResult<bool> {
        let split = 1 + (((self.range - 1) * u32::from(probability)) >> 8);

        if self.count < 0 {
            self.fill()?;
        }

        let bigsplit = u64::from(split) << (BD_VALUE_SIZE - U8_BITS);

        let bit = if self.value >= bigsplit {
            self.range -= split;
            self.value -= bigsplit;
            true
        } else {
            self.range = split;
            false
        };

        // `range` is in [1, 255] here, renormalize it back to [128, 255].
        let shift = self.range.leading_zeros() - 24;
        self.range <<= shift;
        self.value <<= shift;
        self.count -= shift as isize;

        Ok(bit)
    }

    /// Reads a boolean coded with even probability.
    pub fn read_bool(&mut self) -> BoolDecoderResult<bool> {
        self.read_bool_with_prob(DEFAULT_PROBABILITY)
    }

    /// Reads a `nbits`-wide unsigned value, most significant bit first, each
    /// bit coded with even probability.
    pub fn read_literal(&mut self, nbits: usize) -> BoolDecoderResult<u32> {
        let mut ret = 0;

        for _ in 0..nbits {
            ret = (ret << 1) | u32::from(self.read_bool()?);
        }

        Ok(ret)
    }

    /// Reads an unsigned literal and converts it into `U`.
    pub fn read_uint<U: TryFrom<u32>>(&mut self, nbits: usize) -> BoolDecoderResult<U> {
        let value = self.read_literal(nbits)?;
        U::try_from(value).map_err(|_| BoolDecoderError::ConversionFailed)
    }

    /// Returns the number of bits consumed by the arithmetic decoder so far,
    /// not counting the initial 8-bit window.
    pub fn pos(&self) -> usize {
        let mut bit_count = self.count + U8_BITS;

        if bit_count > BD_VALUE_SIZE {
            bit_count = std::cmp::max(0, bit_count - LOTS_OF_BITS);
        }

        (self.next_byte as isize * U8_BITS - bit_count) as usize
    }

    /// Whether every bit of `data` past the last decoded symbol is zero, as
    /// required at the end of a boolean coded partition.
    pub fn padding_is_zero(&self) -> bool {
        // The decoder always holds an 8-bit window ahead of `pos()`.
        let bit = self.pos() + U8_BITS as usize;
        let byte = bit / 8;

        if byte >= self.data.len() {
            return true;
        }

        let mask = 0xffu8 >> (bit % 8);
        self.data[byte] & mask == 0 && self.data[byte + 1..].iter().all(|b| *b == 0)
    }
}
