// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A boolean encoder used to synthesize compressed headers in tests. It
//! produces the same output as libvpx's `vpx_writer`.

pub struct BoolEncoder {
    out: Vec<u8>,
    low: u32,
    range: u32,
    count: i32,
}

impl BoolEncoder {
    /// Creates an encoder and writes the zero marker bit.
    pub fn new() -> Self {
        let mut enc = Self {
            out: Vec::new(),
            low: 0,
            range: 255,
            count: -24,
        };

        enc.write_bool(false, 128);
        enc
    }

    fn propagate_carry(&mut self) {
        let mut x = self.out.len();
        while x > 0 && self.out[x - 1] == 0xff {
            self.out[x - 1] = 0;
            x -= 1;
        }

        self.out[x - 1] += 1;
    }

    pub fn write_bool(&mut self, bit: bool, probability: u8) {
        let split = 1 + (((self.range - 1) * u32::from(probability)) >> 8);

        let mut range = split;
        let mut low = self.low;

        if bit {
            low += split;
            range = self.range - split;
        }

        let mut shift = (range.leading_zeros() - 24) as i32;
        range <<= shift;
        let mut count = self.count + shift;

        if count >= 0 {
            let offset = shift - count;

            if (low << (offset - 1)) & 0x8000_0000 != 0 {
                self.propagate_carry();
            }

            self.out.push((low >> (24 - offset)) as u8);
            low <<= offset;
            shift = count;
            low &= 0xff_ffff;
            count -= 8;
        }

        low <<= shift;

        self.count = count;
        self.low = low;
        self.range = range;
    }

    pub fn write_literal(&mut self, nbits: usize, value: u32) {
        for bit in (0..nbits).rev() {
            self.write_bool((value >> bit) & 1 == 1, 128);
        }
    }

    /// Writes a probability update that leaves the probability untouched.
    pub fn write_no_update(&mut self) {
        self.write_bool(false, 252);
    }

    /// Flushes the coder state and returns the coded bytes.
    pub fn finish(mut self) -> Vec<u8> {
        for _ in 0..32 {
            self.write_bool(false, 128);
        }

        // Make sure the partition cannot be confused with a superframe index.
        if let Some(last) = self.out.last() {
            if last & 0xe0 == 0xc0 {
                self.out.push(0);
            }
        }

        self.out
    }
}
