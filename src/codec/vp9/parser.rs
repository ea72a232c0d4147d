// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::VecDeque;

use enumn::N;
use log::debug;
use thiserror::Error;

use crate::codec::vp9::compressed_header::parse_compressed_header;
use crate::codec::vp9::context::ContextRefreshCb;
use crate::codec::vp9::context::Context;
use crate::codec::vp9::context::ReferenceSlot;
use crate::codec::vp9::lookups::clamp_lf;
use crate::codec::vp9::lookups::clamp_q;
use crate::codec::vp9::lookups::AC_QLOOKUP;
use crate::codec::vp9::lookups::DC_QLOOKUP;
use crate::codec::vp9::probs::FrameContext;
use crate::codec::vp9::superframe::split_superframe;
use crate::codec::vp9::superframe::SuperframeError;
use crate::codec::vp9::uncompressed_header::parse_uncompressed_header;

pub const REFS_PER_FRAME: usize = 3;

pub const MAX_REF_LF_DELTAS: usize = 4;
pub const MAX_MODE_LF_DELTAS: usize = 2;

pub const INTRA_FRAME: usize = 0;
pub const LAST_FRAME: usize = 1;
pub const GOLDEN_FRAME: usize = 2;
pub const ALTREF_FRAME: usize = 3;
pub const MAX_REF_FRAMES: usize = 4;

pub const MAX_SEGMENTS: usize = 8;
pub const SEG_TREE_PROBS: usize = MAX_SEGMENTS - 1;
pub const PREDICTION_PROBS: usize = 3;

pub const SEG_LVL_ALT_Q: usize = 0;
pub const SEG_LVL_ALT_L: usize = 1;
pub const SEG_LVL_REF_FRAME: usize = 2;
pub const SEG_LVL_SKIP: usize = 3;
pub const SEG_LVL_MAX: usize = 4;

pub const REF_FRAMES_LOG2: usize = 3;

/// The number of pictures in the DPB
pub const NUM_REF_FRAMES: usize = 1 << REF_FRAMES_LOG2;

pub const FRAME_CONTEXTS_LOG2: usize = 2;
/// The number of probability contexts kept across frames.
pub const NUM_FRAME_CONTEXTS: usize = 1 << FRAME_CONTEXTS_LOG2;

pub const FRAME_MARKER: u32 = 0x02;
pub const SYNC_CODE: u32 = 0x498342;

pub const MIN_TILE_WIDTH_B64: u32 = 4;
pub const MAX_TILE_WIDTH_B64: u32 = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum InterpolationFilter {
    EightTap = 0,
    EightTapSmooth = 1,
    EightTapSharp = 2,
    Bilinear = 3,
    Switchable = 4,
}

impl Default for InterpolationFilter {
    fn default() -> Self {
        InterpolationFilter::EightTap
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum ReferenceFrameType {
    Intra = 0,
    Last = 1,
    Golden = 2,
    AltRef = 3,
}

impl Default for ReferenceFrameType {
    fn default() -> Self {
        ReferenceFrameType::Intra
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum FrameType {
    KeyFrame = 0,
    InterFrame = 1,
}

impl Default for FrameType {
    fn default() -> Self {
        FrameType::KeyFrame
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum Profile {
    Profile0 = 0,
    Profile1 = 1,
    Profile2 = 2,
    Profile3 = 3,
}

impl Default for Profile {
    fn default() -> Self {
        Profile::Profile0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum BitDepth {
    Depth8 = 8,
    Depth10 = 10,
    Depth12 = 12,
}

impl Default for BitDepth {
    fn default() -> Self {
        BitDepth::Depth8
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum ColorSpace {
    Unknown = 0,
    Bt601 = 1,
    Bt709 = 2,
    Smpte170 = 3,
    Smpte240 = 4,
    Bt2020 = 5,
    Reserved2 = 6,
    CsSrgb = 7,
}

impl Default for ColorSpace {
    fn default() -> Self {
        ColorSpace::Unknown
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum ColorRange {
    StudioSwing = 0,
    FullSwing = 1,
}

impl Default for ColorRange {
    fn default() -> Self {
        ColorRange::StudioSwing
    }
}

/// Specifies how the transform size is determined.
#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum TxMode {
    Only4x4 = 0,
    Allow8x8 = 1,
    Allow16x16 = 2,
    Allow32x32 = 3,
    TxModeSelect = 4,
}

impl Default for TxMode {
    fn default() -> Self {
        TxMode::Only4x4
    }
}

/// Specifies the type of inter prediction used by the frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum ReferenceMode {
    SingleReference = 0,
    CompoundReference = 1,
    ReferenceModeSelect = 2,
}

impl Default for ReferenceMode {
    fn default() -> Self {
        ReferenceMode::SingleReference
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopFilterParams {
    /// Indicates the loop filter strength.
    pub level: u8,
    /// Indicates the sharpness level. The loop filter level and loop
    /// filter_sharpness together determine when a block edge is filtered, and
    /// by how much the filtering can change the sample values.
    pub sharpness: u8,
    /// If set, means that the filter level depends on the mode and reference
    /// frame used to predict a block. If unset, means that the filter level
    /// does not depend on the mode and reference frame.
    pub delta_enabled: bool,
    /// If set, means that the bitstream contains additional syntax elements
    /// that specify which mode and reference frame deltas are to be updated. If
    /// unset, means that these syntax elements are not present.
    pub delta_update: bool,
    /// If set, means that the bitstream contains the syntax element
    /// loop_filter_ref_deltas for the given reference.
    pub update_ref_delta: [bool; MAX_REF_LF_DELTAS],
    /// Contains the adjustment needed for the filter level based on the chosen
    /// reference frame. If this syntax element is not present in the bitstream,
    /// it maintains its previous value.
    pub ref_deltas: [i8; MAX_REF_LF_DELTAS],
    ///  If set, means that the bitstream contains the syntax element
    ///  loop_filter_mode_deltas. If unset, means that the bitstream does not
    ///  contain this syntax element.
    pub update_mode_delta: [bool; MAX_MODE_LF_DELTAS],
    /// Contains the adjustment needed for the filter level based on the chosen
    /// mode. If this syntax element is not present in the bitstream, it
    /// maintains its previous value.
    pub mode_deltas: [i8; MAX_MODE_LF_DELTAS],

    /// Filter level for each segment, reference frame and mode. Derived for
    /// every frame, all zeroes when `level` is 0.
    pub lvl: [[[u8; MAX_MODE_LF_DELTAS]; MAX_REF_FRAMES]; MAX_SEGMENTS],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuantizationParams {
    /// Indicates the base frame qindex. This is used for Y AC coefficients and
    /// as the base value for the other quantizers.
    pub base_q_idx: u8,
    /// Indicates the Y DC quantizer relative to base_q_idx.
    pub delta_q_y_dc: i8,
    /// Indicates the UV DC quantizer relative to base_q_idx.
    pub delta_q_uv_dc: i8,
    /// Indicates the UV AC quantizer relative to base_q_idx.
    pub delta_q_uv_ac: i8,
}

impl QuantizationParams {
    pub fn is_lossless(&self) -> bool {
        self.base_q_idx == 0
            && self.delta_q_y_dc == 0
            && self.delta_q_uv_dc == 0
            && self.delta_q_uv_ac == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentationParams {
    ///  If set, indicates that this frame makes use of the segmentation tool.
    ///  If unset, indicates that the frame does not use segmentation.
    pub enabled: bool,
    /// If set, indicates that the segmentation map should be updated during
    /// the decoding of this frame. If unset, means that the segmentation map
    /// from the previous frame is used.
    pub update_map: bool,
    /// Specify the probability values to be used when decoding segment_id.
    pub tree_probs: [u8; SEG_TREE_PROBS],
    /// Specify the probability values to be used when decoding seg_id_predicted.
    pub pred_probs: [u8; PREDICTION_PROBS],
    /// If set, indicates that the updates to the segmentation map are coded
    /// relative to the existing segmentation map. If unset,
    /// indicates that the new segmentation map is coded without
    /// reference to the existing segmentation map.
    pub temporal_update: bool,
    /// If set, indicates that new parameters are about to be specified for each
    /// segment. If unset, indicates that the segmentation parameters should
    /// keep their existing values.
    pub update_data: bool,
    /// If unset, indicates that the segmentation parameters represent
    /// adjustments relative to the standard values. If set, indicates that the
    /// segmentation parameters represent the actual values to be used.
    pub abs_or_delta_update: bool,
    /// If unset, indicates that the corresponding feature is unused and has
    /// value equal to 0. if set, indicates that the feature value is coded in
    /// the bitstream.
    pub feature_enabled: [[bool; SEG_LVL_MAX]; MAX_SEGMENTS],
    /// Specifies the magnitude of the feature data for a segment feature.
    pub feature_data: [[i16; SEG_LVL_MAX]; MAX_SEGMENTS],

    /// Y DC and AC dequantizers for each segment. Derived for every frame.
    pub y_dequant: [[i16; 2]; MAX_SEGMENTS],
    /// UV DC and AC dequantizers for each segment. Derived for every frame.
    pub uv_dequant: [[i16; 2]; MAX_SEGMENTS],
}

impl SegmentationParams {
    /// Whether `feature` applies to `segment` in the current frame.
    pub fn feature_active(&self, segment: usize, feature: usize) -> bool {
        self.enabled && self.feature_enabled[segment][feature]
    }
}

/// A VP9 frame header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// A subset of syntax, semantics and algorithms defined in a part.
    pub profile: Profile,
    /// The bit depth of the frame.
    pub bit_depth: BitDepth,
    /// Specifies the chroma subsampling format.
    pub subsampling_x: bool,
    /// Specifies the chroma subsampling format.
    pub subsampling_y: bool,
    /// Specifies the color space of the stream.
    pub color_space: ColorSpace,
    /// Specifies the black level and range of the luma and chroma signals as
    /// specified in Rec. ITU-R BT.709-6 and Rec. ITU-R BT.2020-2
    pub color_range: ColorRange,
    /// Indicates the frame indexed by frame_to_show_map_idx is to be displayed.
    /// If unset, indicates that further processing is required.
    pub show_existing_frame: bool,
    /// Specifies the frame to be displayed. It is only available if
    /// show_existing_frame is set.
    pub frame_to_show_map_idx: u8,
    /// Indicates whether a frame is a key frame.
    pub frame_type: FrameType,
    /// Whether this frame should be displayed.
    pub show_frame: bool,
    /// Whether error resilient mode is enabled.
    pub error_resilient_mode: bool,
    /// The width of the frame in pixels.
    pub width: u32,
    /// The height of the frame in pixels.
    pub height: u32,
    /// If unset, means that the render width and height are inferred from the
    /// frame width and height. If set, means that the render width and height
    /// are explicitly coded in the bitstream.
    pub render_and_frame_size_different: bool,
    /// The render width of the frame in pixels.
    pub render_width: u32,
    /// The render height of the frame in pixels.
    pub render_height: u32,
    /// If set, indicates that this frame is an intra-only frame. If unset,
    /// indicates that this frame is a inter frame.
    pub intra_only: bool,
    /// Specifies whether the frame context should be reset to default values.
    pub reset_frame_context: u8,
    /// Contains a bitmask that specifies which reference frame slots will be
    /// updated with the current frame after it is decoded.
    pub refresh_frame_flags: u8,
    /// Specifies which reference frames are used by inter frames. It is a
    /// requirement of bitstream conformance that the selected reference frames
    /// match the current frame in bit depth, profile, chroma subsampling, and
    /// color space.
    pub ref_frame_idx: [u8; REFS_PER_FRAME],
    /// Specifies the intended direction of the motion vector in time for each
    /// reference frame. A sign bias equal to 0 indicates that the reference
    /// frame is a backwards reference; a sign bias equal to 1 indicates that
    /// the reference frame is a forwards reference
    pub ref_frame_sign_bias: [u8; MAX_REF_FRAMES],
    /// If unset, specifies that motion vectors are specified to quarter pel
    /// precision. If set, specifies that motion vectors are specified to eighth
    /// pel precision.
    pub allow_high_precision_mv: bool,
    /// The interpolation filter parameters.
    pub interpolation_filter: InterpolationFilter,
    /// If set, indicates that the probabilities computed for this frame (after
    /// adapting to the observed frequencies if adaption is enabled) should be
    /// stored for reference by future frames. If unset, indicates that the
    /// probabilities should be discarded at the end of the frame.
    pub refresh_frame_context: bool,
    /// Whether parallel decoding mode is enabled.
    pub frame_parallel_decoding_mode: bool,
    /// Indicates the frame context to use.
    pub frame_context_idx: u8,
    /// The loop filter parameters
    pub lf: LoopFilterParams,
    /// The quantization parameters.
    pub quant: QuantizationParams,
    /// The segmentation parameters
    pub seg: SegmentationParams,
    /// Specifies the base 2 logarithm of the width of each tile (where the
    /// width is measured in units of 8x8 blocks). It is a requirement of
    /// bitstream conformance that tile_cols_log2 is less than or equal to 6.
    pub tile_cols_log2: u8,
    /// Specifies the base 2 logarithm of the height of each tile (where the
    /// height is measured in units of 8x8 blocks).
    pub tile_rows_log2: u8,
    /// Computed from the syntax elements. If set, indicates that the frame is
    /// coded using a special 4x4 transform designed for encoding frames that
    /// are bit-identical with the original frames.
    pub lossless: bool,
    /// Indicates the size of the compressed header in bytes.
    pub header_size_in_bytes: u16,
    /// Indicates the size of the uncompressed header in bytes.
    pub uncompressed_header_size_in_bytes: u16,

    /// Specifies how the transform size is determined. Only set when the
    /// compressed header is parsed.
    pub tx_mode: TxMode,
    /// Whether single, compound or per-block reference selection is used. Only
    /// set when the compressed header is parsed.
    pub reference_mode: ReferenceMode,
    /// The reference frame used by every compound prediction.
    pub comp_fixed_ref: ReferenceFrameType,
    /// The two reference frames a compound prediction can pick its second
    /// reference from.
    pub comp_var_ref: [ReferenceFrameType; 2],
    /// The frame context loaded for this frame, before the deltas of the
    /// compressed header were applied.
    pub initial_frame_context: FrameContext,
    /// The frame context after applying the deltas of the compressed header.
    pub frame_context: FrameContext,
}

impl Header {
    pub fn is_keyframe(&self) -> bool {
        !self.show_existing_frame && self.frame_type == FrameType::KeyFrame
    }

    pub fn is_intra(&self) -> bool {
        !self.show_existing_frame && (self.frame_type == FrameType::KeyFrame || self.intra_only)
    }

    /// Whether the reference slot `idx` is refreshed with this frame.
    pub fn refresh_flag(&self, idx: usize) -> bool {
        self.refresh_frame_flags & (1 << idx) != 0
    }
}

/// Result of a successful [`Parser::parse_next_frame`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// A frame was parsed.
    Frame(Header),
    /// All the frames of the current stream were parsed, more data is needed.
    EndOfStream,
    /// The next frame uses a frame context that the client still has to
    /// refresh through the callback from [`Parser::context_refresh_cb`]. The
    /// frame is kept and parsed again on the next call.
    AwaitingRefresh,
}

/// Reasons for which a frame is rejected. The offending frame is dropped.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid superframe index: {0}")]
    Superframe(#[from] SuperframeError),
    #[error("the stream contains no frames")]
    NoFrames,
    #[error("failed to parse the uncompressed header: {0:#}")]
    UncompressedHeader(anyhow::Error),
    #[error("failed to parse the compressed header: {0:#}")]
    CompressedHeader(anyhow::Error),
    #[error("padding byte at offset {offset} is not zero")]
    NonZeroPadding { offset: usize },
    #[error("headers take {header_size} bytes, but the frame only has {frame_size}")]
    HeaderExceedsFrame {
        header_size: usize,
        frame_size: usize,
    },
    #[error("frame context {0} is used before being initialized")]
    UninitializedContext(u8),
}

/// A frame whose headers are being parsed, kept around while its frame context
/// awaits a refresh.
struct PendingFrame<'a> {
    data: &'a [u8],
    header: Header,
}

/// A stateful VP9 frame header parser.
///
/// Data is fed through [`Parser::set_stream`], then frames are pulled one at
/// a time with [`Parser::parse_next_frame`]. The parser keeps the state that
/// later frames depend on: frame contexts, reference slots, loop filter and
/// segmentation parameters.
pub struct Parser<'a> {
    /// Data not yet split into frames.
    stream: Option<&'a [u8]>,
    /// Frames of the current superframe that were not parsed yet.
    frames: VecDeque<&'a [u8]>,
    pending: Option<PendingFrame<'a>>,
    context: Context,
    parse_compressed_header: bool,
}

impl<'a> Default for Parser<'a> {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<'a> Parser<'a> {
    /// Creates a parser. If `parse_compressed_header` is unset, the compressed
    /// header and the frame contexts are left alone, which is enough for
    /// clients that only need the uncompressed header.
    pub fn new(parse_compressed_header: bool) -> Self {
        Self {
            stream: None,
            frames: Default::default(),
            pending: None,
            context: Default::default(),
            parse_compressed_header,
        }
    }

    /// Sets the data to parse frames from. Frames left over from the previous
    /// stream, including a frame awaiting a refresh, are dropped.
    pub fn set_stream(&mut self, stream: &'a [u8]) {
        self.stream = Some(stream);
        self.frames.clear();
        self.pending = None;
    }

    /// Drops the current stream and all the state accumulated from previous
    /// frames.
    pub fn reset(&mut self) {
        self.stream = None;
        self.frames.clear();
        self.pending = None;
        self.context.reset();
    }

    /// The state carried from one frame to the next.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Returns the callback through which the client provides the adapted
    /// probabilities for frame context `frame_context_idx`, or `None` if that
    /// context is not awaiting a refresh.
    pub fn context_refresh_cb(&self, frame_context_idx: usize) -> Option<ContextRefreshCb> {
        self.context
            .frame_context_managers
            .get(frame_context_idx)?
            .update_cb()
    }

    fn next_frame(&mut self) -> Result<Option<&'a [u8]>, ParseError> {
        if self.frames.is_empty() {
            let Some(stream) = self.stream.take() else {
                return Ok(None);
            };

            let frames = split_superframe(stream)?;
            if frames.is_empty() {
                return Err(ParseError::NoFrames);
            }

            self.frames = frames.iter().map(|frame| frame.data(stream)).collect();
        }

        Ok(self.frames.pop_front())
    }

    /// Parses the headers of the next frame of the stream.
    pub fn parse_next_frame(&mut self) -> Result<ParseStatus, ParseError> {
        if let Some(PendingFrame { data, header }) = self.pending.take() {
            return self.parse_frame_state(data, header);
        }

        let Some(data) = self.next_frame()? else {
            return Ok(ParseStatus::EndOfStream);
        };

        let header = parse_uncompressed_header(data, &mut self.context)
            .map_err(ParseError::UncompressedHeader)?;

        debug!(
            "Parsed {:?} of {}x{}, {} bytes",
            header.frame_type,
            header.width,
            header.height,
            data.len()
        );

        let uncompressed_size = usize::from(header.uncompressed_header_size_in_bytes);

        if header.header_size_in_bytes == 0 {
            // A frame without a compressed header carries nothing but zeroes
            // after the uncompressed header.
            if let Some(offset) = data[uncompressed_size..].iter().position(|b| *b != 0) {
                return Err(ParseError::NonZeroPadding {
                    offset: uncompressed_size + offset,
                });
            }

            return Ok(ParseStatus::Frame(header));
        }

        let header_size = uncompressed_size + usize::from(header.header_size_in_bytes);
        if header_size > data.len() {
            return Err(ParseError::HeaderExceedsFrame {
                header_size,
                frame_size: data.len(),
            });
        }

        self.parse_frame_state(data, header)
    }

    /// Parses the compressed header of `data` if requested, then derives the
    /// per-frame tables and updates the reference slots.
    fn parse_frame_state(
        &mut self,
        data: &'a [u8],
        mut header: Header,
    ) -> Result<ParseStatus, ParseError> {
        if self.parse_compressed_header {
            let idx = header.frame_context_idx;
            let manager = &mut self.context.frame_context_managers[usize::from(idx)];

            if !manager.initialized() {
                return Err(ParseError::UninitializedContext(idx));
            }

            if manager.needs_client_update() {
                debug!("Waiting for frame context {} to be refreshed", idx);
                self.pending = Some(PendingFrame { data, header });
                return Ok(ParseStatus::AwaitingRefresh);
            }

            header.frame_context = manager.frame_context();
            header.initial_frame_context = header.frame_context.clone();

            let start = usize::from(header.uncompressed_header_size_in_bytes);
            let end = start + usize::from(header.header_size_in_bytes);
            parse_compressed_header(&data[start..end], &mut header)
                .map_err(ParseError::CompressedHeader)?;

            if header.refresh_frame_context {
                if header.frame_parallel_decoding_mode {
                    debug!("Refreshing frame context {}", idx);
                    manager.update(header.frame_context.clone());
                } else {
                    debug!("Frame context {} will be refreshed by the client", idx);
                    manager.set_needs_client_update();
                }
            }
        }

        setup_segmentation_dequant(&mut header);
        setup_loop_filter(&mut header.lf, &header.seg);
        self.update_slots(&header);

        Ok(ParseStatus::Frame(header))
    }

    fn update_slots(&mut self, header: &Header) {
        for i in 0..NUM_REF_FRAMES {
            if header.refresh_flag(i) {
                self.context.update_ref_slot(
                    i,
                    ReferenceSlot {
                        initialized: true,
                        frame_width: header.width,
                        frame_height: header.height,
                        subsampling_x: header.subsampling_x,
                        subsampling_y: header.subsampling_y,
                        bit_depth: header.bit_depth,
                        profile: header.profile,
                        color_space: header.color_space,
                    },
                );
            }
        }
    }
}

/// Returns the quantizer index of `segment`.
fn get_q_index(quant: &QuantizationParams, seg: &SegmentationParams, segment: usize) -> i32 {
    let base_q_idx = i32::from(quant.base_q_idx);

    if seg.feature_active(segment, SEG_LVL_ALT_Q) {
        let data = i32::from(seg.feature_data[segment][SEG_LVL_ALT_Q]);
        let q_index = if seg.abs_or_delta_update {
            data
        } else {
            base_q_idx + data
        };

        return clamp_q(q_index) as i32;
    }

    base_q_idx
}

/// Fills the dequantizer tables of `header.seg`.
fn setup_segmentation_dequant(header: &mut Header) {
    let seg = &mut header.seg;
    let quant = &header.quant;

    seg.y_dequant = Default::default();
    seg.uv_dequant = Default::default();

    let num_segments = if seg.enabled { MAX_SEGMENTS } else { 1 };

    for i in 0..num_segments {
        let q_index = get_q_index(quant, seg, i);

        seg.y_dequant[i][0] = DC_QLOOKUP[clamp_q(q_index + i32::from(quant.delta_q_y_dc))];
        seg.y_dequant[i][1] = AC_QLOOKUP[clamp_q(q_index)];
        seg.uv_dequant[i][0] = DC_QLOOKUP[clamp_q(q_index + i32::from(quant.delta_q_uv_dc))];
        seg.uv_dequant[i][1] = AC_QLOOKUP[clamp_q(q_index + i32::from(quant.delta_q_uv_ac))];
    }
}

/// Fills the filter level table of `lf`.
fn setup_loop_filter(lf: &mut LoopFilterParams, seg: &SegmentationParams) {
    lf.lvl = Default::default();

    if lf.level == 0 {
        return;
    }

    let scale = if lf.level < 32 { 1 } else { 2 };

    for i in 0..MAX_SEGMENTS {
        let mut level = i32::from(lf.level);

        if seg.feature_active(i, SEG_LVL_ALT_L) {
            let data = i32::from(seg.feature_data[i][SEG_LVL_ALT_L]);
            level = i32::from(clamp_lf(if seg.abs_or_delta_update {
                data
            } else {
                level + data
            }));
        }

        if !lf.delta_enabled {
            lf.lvl[i] = [[level as u8; MAX_MODE_LF_DELTAS]; MAX_REF_FRAMES];
            continue;
        }

        let intra_delta = i32::from(lf.ref_deltas[INTRA_FRAME]) * scale;
        lf.lvl[i][INTRA_FRAME][0] = clamp_lf(level + intra_delta);
        lf.lvl[i][INTRA_FRAME][1] = 0;

        for ref_frame in LAST_FRAME..MAX_REF_FRAMES {
            for mode in 0..MAX_MODE_LF_DELTAS {
                let ref_delta = i32::from(lf.ref_deltas[ref_frame]) * scale;
                let mode_delta = i32::from(lf.mode_deltas[mode]) * scale;
                lf.lvl[i][ref_frame][mode] = clamp_lf(level + ref_delta + mode_delta);
            }
        }
    }
}
