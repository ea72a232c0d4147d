// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Builders for synthetic VP9 frames used by the parser tests.

use crate::codec::vp9::bool_encoder::BoolEncoder;
use crate::codec::vp9::context::ReferenceSlot;
use crate::codec::vp9::parser::BitDepth;
use crate::codec::vp9::parser::ColorSpace;
use crate::codec::vp9::parser::Profile;
use crate::codec::vp9::parser::ReferenceMode;
use crate::codec::vp9::parser::TxMode;
use crate::codec::vp9::parser::FRAME_MARKER;
use crate::codec::vp9::parser::MAX_SEGMENTS;
use crate::codec::vp9::parser::SEG_LVL_MAX;
use crate::codec::vp9::parser::SYNC_CODE;
use crate::codec::vp9::uncompressed_header::calc_max_log2_tile_cols;
use crate::codec::vp9::uncompressed_header::calc_min_log2_tile_cols;

/// Packs uncompressed header syntax elements most significant bit first.
#[derive(Default)]
pub(crate) struct HeaderWriter {
    out: Vec<u8>,
    nbits: usize,
}

impl HeaderWriter {
    pub fn write_bit(&mut self, bit: bool) {
        if self.nbits % 8 == 0 {
            self.out.push(0);
        }
        if bit {
            let last = self.out.len() - 1;
            self.out[last] |= 0x80 >> (self.nbits % 8);
        }
        self.nbits += 1;
    }

    /// Writes the `bits` low bits of `value`.
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) {
        let value = value.into();
        for i in (0..bits).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Writes the magnitude of `value` on `bits` bits, then its sign.
    pub fn write_su(&mut self, bits: usize, value: i32) {
        self.write_f(bits, value.unsigned_abs());
        self.write_bit(value < 0);
    }

    /// Returns the written bytes, the last one padded with zeroes.
    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// Reference related syntax of an inter frame.
#[derive(Clone, Debug)]
pub(crate) struct InterFrame {
    pub ref_frame_idx: [u8; 3],
    pub sign_bias: [bool; 3],
    /// Reference to copy the frame size from. If `None`, `size` is coded
    /// explicitly. Tile info is always derived from `size`, so it must match
    /// the size of the reference.
    pub size_from_ref: Option<usize>,
    pub size: (u32, u32),
    pub allow_high_precision_mv: bool,
    pub switchable_interp_filter: bool,
}

impl Default for InterFrame {
    fn default() -> Self {
        Self {
            ref_frame_idx: [0, 1, 2],
            sign_bias: [false; 3],
            size_from_ref: None,
            size: (320, 240),
            allow_high_precision_mv: true,
            switchable_interp_filter: false,
        }
    }
}

#[derive(Clone, Debug)]
enum FrameKind {
    Key,
    IntraOnly,
    Inter(InterFrame),
}

/// Writes the uncompressed header of a frame, with the loop filter and
/// quantizer settings of a typical libvpx stream unless told otherwise.
#[derive(Clone, Debug)]
pub(crate) struct FrameBuilder {
    kind: FrameKind,
    profile: u8,
    twelve_bit: bool,
    color_space: u8,
    full_range: bool,
    subsampling: (bool, bool),
    show_frame: bool,
    error_resilient: bool,
    reset_frame_context: u8,
    refresh_frame_flags: u8,
    width: u32,
    height: u32,
    refresh_frame_context: bool,
    frame_parallel: bool,
    frame_context_idx: u8,
    lf_level: u8,
    lf_delta_update: bool,
    base_q_idx: u8,
    segment_features: Vec<(usize, usize, i32)>,
    header_size: u16,
}

impl FrameBuilder {
    fn new(kind: FrameKind, width: u32, height: u32) -> Self {
        Self {
            kind,
            profile: 0,
            twelve_bit: false,
            color_space: 0,
            full_range: false,
            subsampling: (true, true),
            show_frame: true,
            error_resilient: false,
            reset_frame_context: 0,
            refresh_frame_flags: 0,
            width,
            height,
            refresh_frame_context: true,
            frame_parallel: true,
            frame_context_idx: 0,
            lf_level: 9,
            lf_delta_update: true,
            base_q_idx: 65,
            segment_features: vec![],
            header_size: 0,
        }
    }

    pub fn keyframe(width: u32, height: u32) -> Self {
        Self::new(FrameKind::Key, width, height)
    }

    /// A hidden intra-only frame.
    pub fn intra_only(width: u32, height: u32) -> Self {
        Self {
            show_frame: false,
            ..Self::new(FrameKind::IntraOnly, width, height)
        }
    }

    pub fn inter(inter: InterFrame) -> Self {
        let (width, height) = inter.size;
        Self {
            lf_delta_update: false,
            ..Self::new(FrameKind::Inter(inter), width, height)
        }
    }

    /// A one byte frame showing reference slot `idx`.
    pub fn show_existing(idx: u8) -> Vec<u8> {
        vec![0x88 | idx]
    }

    /// A reference slot holding an 8-bit 4:2:0 frame.
    pub fn slot(width: u32, height: u32) -> ReferenceSlot {
        ReferenceSlot {
            initialized: true,
            frame_width: width,
            frame_height: height,
            subsampling_x: true,
            subsampling_y: true,
            bit_depth: BitDepth::Depth8,
            profile: Profile::Profile0,
            color_space: ColorSpace::Unknown,
        }
    }

    pub fn profile(mut self, profile: u8) -> Self {
        self.profile = profile;
        self
    }

    pub fn twelve_bit(mut self, twelve_bit: bool) -> Self {
        self.twelve_bit = twelve_bit;
        self
    }

    pub fn color_space(mut self, color_space: u8, full_range: bool) -> Self {
        self.color_space = color_space;
        self.full_range = full_range;
        self
    }

    /// Only coded for profiles 1 and 3.
    pub fn subsampling(mut self, x: bool, y: bool) -> Self {
        self.subsampling = (x, y);
        self
    }

    pub fn show_frame(mut self, show_frame: bool) -> Self {
        self.show_frame = show_frame;
        self
    }

    pub fn error_resilient(mut self, error_resilient: bool) -> Self {
        self.error_resilient = error_resilient;
        self
    }

    pub fn reset_frame_context(mut self, reset_frame_context: u8) -> Self {
        self.reset_frame_context = reset_frame_context;
        self
    }

    /// Ignored for keyframes, which refresh every slot.
    pub fn refresh_frame_flags(mut self, refresh_frame_flags: u8) -> Self {
        self.refresh_frame_flags = refresh_frame_flags;
        self
    }

    pub fn refresh_frame_context(mut self, refresh: bool, frame_parallel: bool) -> Self {
        self.refresh_frame_context = refresh;
        self.frame_parallel = frame_parallel;
        self
    }

    pub fn frame_context_idx(mut self, frame_context_idx: u8) -> Self {
        self.frame_context_idx = frame_context_idx;
        self
    }

    pub fn loop_filter_level(mut self, level: u8) -> Self {
        self.lf_level = level;
        self
    }

    pub fn base_q_idx(mut self, base_q_idx: u8) -> Self {
        self.base_q_idx = base_q_idx;
        self
    }

    /// Enables segmentation and sets `feature` of `segment` to `value`.
    pub fn segment_feature(mut self, segment: usize, feature: usize, value: i32) -> Self {
        self.segment_features.push((segment, feature, value));
        self
    }

    pub fn header_size(mut self, header_size: u16) -> Self {
        self.header_size = header_size;
        self
    }

    fn write_color_config(&self, w: &mut HeaderWriter) {
        let high_profile = self.profile == 1 || self.profile == 3;

        if self.profile >= 2 {
            w.write_bit(self.twelve_bit);
        }

        w.write_f(3, u32::from(self.color_space));

        if self.color_space != ColorSpace::CsSrgb as u8 {
            w.write_bit(self.full_range);
            if high_profile {
                w.write_bit(self.subsampling.0);
                w.write_bit(self.subsampling.1);
                w.write_bit(false);
            }
        } else if high_profile {
            w.write_bit(false);
        }
    }

    fn write_frame_size(&self, w: &mut HeaderWriter) {
        w.write_f(16, self.width - 1);
        w.write_f(16, self.height - 1);
        // Render size equal to the frame size.
        w.write_bit(false);
    }

    fn write_inter_refs(&self, w: &mut HeaderWriter, inter: &InterFrame) {
        w.write_f(8, self.refresh_frame_flags);

        for i in 0..3 {
            w.write_f(3, inter.ref_frame_idx[i]);
            w.write_bit(inter.sign_bias[i]);
        }

        match inter.size_from_ref {
            Some(idx) => {
                for i in 0..=idx {
                    w.write_bit(i == idx);
                }
                w.write_bit(false);
            }
            None => {
                for _ in 0..3 {
                    w.write_bit(false);
                }
                self.write_frame_size(w);
            }
        }

        w.write_bit(inter.allow_high_precision_mv);

        if inter.switchable_interp_filter {
            w.write_bit(true);
        } else {
            w.write_bit(false);
            // EightTap
            w.write_f(2, 1u32);
        }
    }

    fn write_loop_filter(&self, w: &mut HeaderWriter) {
        w.write_f(6, self.lf_level);
        // Sharpness.
        w.write_f(3, 0u32);
        // Deltas enabled.
        w.write_bit(true);
        w.write_bit(self.lf_delta_update);

        if self.lf_delta_update {
            for delta in [Some(1), None, Some(-1), Some(-1)] {
                w.write_bit(delta.is_some());
                if let Some(delta) = delta {
                    w.write_su(6, delta);
                }
            }

            for _ in 0..2 {
                w.write_bit(false);
            }
        }
    }

    fn write_segmentation(&self, w: &mut HeaderWriter) {
        const FEATURE_BITS: [usize; SEG_LVL_MAX] = [8, 6, 2, 0];
        const FEATURE_SIGNED: [bool; SEG_LVL_MAX] = [true, true, false, false];

        if self.segment_features.is_empty() {
            w.write_bit(false);
            return;
        }

        w.write_bit(true);
        // No map update.
        w.write_bit(false);
        // Data update, coded as deltas.
        w.write_bit(true);
        w.write_bit(false);

        for i in 0..MAX_SEGMENTS {
            for j in 0..SEG_LVL_MAX {
                let value = self
                    .segment_features
                    .iter()
                    .find(|(segment, feature, _)| *segment == i && *feature == j)
                    .map(|(_, _, value)| *value);

                w.write_bit(value.is_some());

                if let Some(value) = value {
                    if FEATURE_SIGNED[j] {
                        w.write_su(FEATURE_BITS[j], value);
                    } else {
                        w.write_f(FEATURE_BITS[j], value as u32);
                    }
                }
            }
        }
    }

    fn write_tile_info(&self, w: &mut HeaderWriter) {
        let sb64_cols = (((self.width + 7) >> 3) + 7) >> 3;

        // Stay at the minimum number of tile columns.
        if calc_min_log2_tile_cols(sb64_cols) < calc_max_log2_tile_cols(sb64_cols) {
            w.write_bit(false);
        }

        // A single tile row.
        w.write_bit(false);
    }

    /// Returns the uncompressed header.
    pub fn build(&self) -> Vec<u8> {
        let mut w = HeaderWriter::default();

        w.write_f(2, FRAME_MARKER);
        w.write_bit(self.profile & 1 != 0);
        w.write_bit(self.profile & 2 != 0);
        if self.profile == 3 {
            w.write_bit(false);
        }

        // show_existing_frame
        w.write_bit(false);
        w.write_bit(!matches!(self.kind, FrameKind::Key));
        w.write_bit(self.show_frame);
        w.write_bit(self.error_resilient);

        match &self.kind {
            FrameKind::Key => {
                w.write_f(24, SYNC_CODE);
                self.write_color_config(&mut w);
                self.write_frame_size(&mut w);
            }
            kind => {
                if !self.show_frame {
                    w.write_bit(matches!(kind, FrameKind::IntraOnly));
                }

                if !self.error_resilient {
                    w.write_f(2, self.reset_frame_context);
                }

                match kind {
                    FrameKind::Inter(inter) => self.write_inter_refs(&mut w, inter),
                    _ => {
                        w.write_f(24, SYNC_CODE);
                        if self.profile > 0 {
                            self.write_color_config(&mut w);
                        }
                        w.write_f(8, self.refresh_frame_flags);
                        self.write_frame_size(&mut w);
                    }
                }
            }
        }

        if !self.error_resilient {
            w.write_bit(self.refresh_frame_context);
            w.write_bit(self.frame_parallel);
        }

        w.write_f(2, self.frame_context_idx);

        self.write_loop_filter(&mut w);

        w.write_f(8, self.base_q_idx);
        for _ in 0..3 {
            w.write_bit(false);
        }

        self.write_segmentation(&mut w);
        self.write_tile_info(&mut w);

        w.write_f(16, self.header_size);

        w.finish()
    }

    /// Returns a complete frame made of the uncompressed header followed by
    /// `compressed_header`.
    pub fn build_with(&self, compressed_header: &[u8]) -> Vec<u8> {
        let header_size = u16::try_from(compressed_header.len()).unwrap();
        let mut frame = self.clone().header_size(header_size).build();
        frame.extend_from_slice(compressed_header);
        frame
    }
}

/// Describes a compressed header to code. Probabilities not mentioned are
/// left untouched.
#[derive(Clone, Debug)]
pub(crate) struct CompressedHeaderBuilder {
    pub lossless: bool,
    pub tx_mode: TxMode,
    pub intra: bool,
    pub switchable_interp_filter: bool,
    pub compound_reference_allowed: bool,
    pub reference_mode: ReferenceMode,
    pub allow_high_precision_mv: bool,
    /// Subexponential delta for the first 8x8 transform size probability.
    pub tx_8x8_delta: Option<u8>,
    /// Subexponential delta for the first 4x4 coefficient probability.
    pub coef_delta: Option<u8>,
    /// Subexponential delta for the first skip probability.
    pub skip_delta: Option<u8>,
    /// 7-bit value for the first motion vector joint probability.
    pub mv_joint: Option<u8>,
}

impl Default for CompressedHeaderBuilder {
    fn default() -> Self {
        Self {
            lossless: false,
            tx_mode: TxMode::Only4x4,
            intra: true,
            switchable_interp_filter: false,
            compound_reference_allowed: false,
            reference_mode: ReferenceMode::SingleReference,
            allow_high_precision_mv: false,
            tx_8x8_delta: None,
            coef_delta: None,
            skip_delta: None,
            mv_joint: None,
        }
    }
}

fn write_term_subexp(enc: &mut BoolEncoder, delta: u8) {
    let v = u32::from(delta);

    if v < 16 {
        enc.write_literal(1, 0);
        enc.write_literal(4, v);
    } else if v < 32 {
        enc.write_literal(2, 0b10);
        enc.write_literal(4, v - 16);
    } else if v < 64 {
        enc.write_literal(3, 0b110);
        enc.write_literal(5, v - 32);
    } else {
        enc.write_literal(3, 0b111);
        if v < 129 {
            enc.write_literal(7, v - 64);
        } else {
            enc.write_literal(7, (v + 1) >> 1);
            enc.write_literal(1, (v + 1) & 1);
        }
    }
}

fn write_diff_updates(enc: &mut BoolEncoder, first: Option<u8>, count: usize) {
    match first {
        Some(delta) => {
            enc.write_bool(true, 252);
            write_term_subexp(enc, delta);
        }
        None => enc.write_no_update(),
    }

    for _ in 1..count {
        enc.write_no_update();
    }
}

fn write_no_updates(enc: &mut BoolEncoder, count: usize) {
    write_diff_updates(enc, None, count);
}

impl CompressedHeaderBuilder {
    pub fn build(&self) -> Vec<u8> {
        const TX_MODE_TO_BIGGEST_TX_SIZE: [usize; 5] = [0, 1, 2, 3, 3];
        const COEF_PROBS_PER_TX_SIZE: usize = 2 * 2 * (3 + 5 * 6) * 3;

        let mut enc = BoolEncoder::new();

        let tx_mode = if self.lossless {
            TxMode::Only4x4
        } else {
            let tx_mode = self.tx_mode as u32;
            enc.write_literal(2, tx_mode.min(3));
            if tx_mode >= 3 {
                enc.write_literal(1, tx_mode - 3);
            }
            self.tx_mode
        };

        if tx_mode == TxMode::TxModeSelect {
            write_diff_updates(&mut enc, self.tx_8x8_delta, 2);
            write_no_updates(&mut enc, 4 + 6);
        }

        for tx_size in 0..=TX_MODE_TO_BIGGEST_TX_SIZE[tx_mode as usize] {
            match self.coef_delta {
                Some(delta) if tx_size == 0 => {
                    enc.write_literal(1, 1);
                    write_diff_updates(&mut enc, Some(delta), COEF_PROBS_PER_TX_SIZE);
                }
                _ => enc.write_literal(1, 0),
            }
        }

        write_diff_updates(&mut enc, self.skip_delta, 3);

        if !self.intra {
            // Inter mode.
            write_no_updates(&mut enc, 7 * 3);

            if self.switchable_interp_filter {
                write_no_updates(&mut enc, 4 * 2);
            }

            // Is inter.
            write_no_updates(&mut enc, 4);

            if self.compound_reference_allowed {
                let compound = self.reference_mode != ReferenceMode::SingleReference;
                enc.write_literal(1, compound as u32);
                if compound {
                    let select = self.reference_mode == ReferenceMode::ReferenceModeSelect;
                    enc.write_literal(1, select as u32);
                }
            }

            if self.reference_mode == ReferenceMode::ReferenceModeSelect {
                write_no_updates(&mut enc, 5);
            }
            if self.reference_mode != ReferenceMode::CompoundReference {
                write_no_updates(&mut enc, 5 * 2);
            }
            if self.reference_mode != ReferenceMode::SingleReference {
                write_no_updates(&mut enc, 5);
            }

            // Y mode and partition.
            write_no_updates(&mut enc, 4 * 9);
            write_no_updates(&mut enc, 16 * 3);

            match self.mv_joint {
                Some(value) => {
                    enc.write_bool(true, 252);
                    enc.write_literal(7, u32::from(value));
                }
                None => enc.write_no_update(),
            }
            write_no_updates(&mut enc, 2);

            // Sign, classes, class0 bit and bits of both components, then
            // their fractional parts.
            write_no_updates(&mut enc, 2 * (1 + 10 + 1 + 10));
            write_no_updates(&mut enc, 2 * (2 * 3 + 3));

            if self.allow_high_precision_mv {
                write_no_updates(&mut enc, 2 * 2);
            }
        }

        enc.finish()
    }
}

/// Bundles `frames` into a superframe using 4-byte sizes.
pub(crate) fn superframe(frames: &[&[u8]]) -> Vec<u8> {
    let marker = 0xc0 | (3 << 3) | (frames.len() - 1) as u8;
    let mut out = vec![];

    for frame in frames {
        out.extend_from_slice(frame);
    }

    out.push(marker);
    for frame in frames {
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    }
    out.push(marker);

    out
}

#[cfg(test)]
mod tests {
    use crate::codec::vp9::test_utils::HeaderWriter;

    #[test]
    fn frame_marker_and_sync_code() {
        let mut w = HeaderWriter::default();
        // Frame marker, profile 0, a keyframe shown without error
        // resilience, then the sync code.
        w.write_f(2, 2u32);
        w.write_f(2, 0u32);
        w.write_f(4, 0b0010u32);
        w.write_f(24, 0x498342u32);
        assert_eq!(w.finish(), vec![0x82, 0x49, 0x83, 0x42]);
    }

    #[test]
    fn partial_bytes_are_zero_padded() {
        let mut w = HeaderWriter::default();
        w.write_f(3, 0b100u8);
        w.write_f(3, 0b101u8);
        w.write_f(3, 0b011u8);
        assert_eq!(w.finish(), vec![0b10010101, 0b10000000]);
    }

    #[test]
    fn signed_values() {
        let mut w = HeaderWriter::default();
        w.write_su(6, -1);
        w.write_su(4, 5);
        assert_eq!(w.finish(), vec![0b00000110, 0b10100000]);
    }
}
