// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::anyhow;
use anyhow::Context as AnyhowContext;
use bitreader::BitReader;

use crate::codec::vp9::context::ColorConfig;
use crate::codec::vp9::context::Context;
use crate::codec::vp9::parser::BitDepth;
use crate::codec::vp9::parser::ColorRange;
use crate::codec::vp9::parser::ColorSpace;
use crate::codec::vp9::parser::FrameType;
use crate::codec::vp9::parser::Header;
use crate::codec::vp9::parser::InterpolationFilter;
use crate::codec::vp9::parser::LoopFilterParams;
use crate::codec::vp9::parser::Profile;
use crate::codec::vp9::parser::QuantizationParams;
use crate::codec::vp9::parser::ReferenceFrameType;
use crate::codec::vp9::parser::SegmentationParams;
use crate::codec::vp9::parser::FRAME_CONTEXTS_LOG2;
use crate::codec::vp9::parser::FRAME_MARKER;
use crate::codec::vp9::parser::MAX_MODE_LF_DELTAS;
use crate::codec::vp9::parser::MAX_REF_LF_DELTAS;
use crate::codec::vp9::parser::MAX_SEGMENTS;
use crate::codec::vp9::parser::MAX_TILE_WIDTH_B64;
use crate::codec::vp9::parser::MIN_TILE_WIDTH_B64;
use crate::codec::vp9::parser::PREDICTION_PROBS;
use crate::codec::vp9::parser::REFS_PER_FRAME;
use crate::codec::vp9::parser::REF_FRAMES_LOG2;
use crate::codec::vp9::parser::SEG_LVL_MAX;
use crate::codec::vp9::parser::SEG_TREE_PROBS;
use crate::codec::vp9::parser::SYNC_CODE;
use crate::codec::vp9::probs::FrameContext;

fn read_signed_8(r: &mut BitReader, nbits: u8) -> anyhow::Result<i8> {
    let value = r.read_u8(nbits)?;

    let negative = r.read_bool()?;

    if negative {
        Ok(-(value as i8))
    } else {
        Ok(value as i8)
    }
}

fn read_reserved_zero(r: &mut BitReader) -> anyhow::Result<()> {
    if r.read_bool()? {
        return Err(anyhow!("Broken stream: reserved bit is set"));
    }

    Ok(())
}

fn parse_frame_marker(r: &mut BitReader) -> anyhow::Result<()> {
    let marker = r.read_u32(2)?;

    if marker != FRAME_MARKER {
        return Err(anyhow!(
            "Broken stream: expected frame marker, found {:?}",
            marker
        ));
    }

    Ok(())
}

fn parse_profile(r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
    let low = r.read_u32(1)?;
    let high = r.read_u32(1)?;

    let profile = (high << 1) | low;

    if profile == 3 {
        read_reserved_zero(r)?;
    }

    hdr.profile = Profile::n(profile)
        .with_context(|| format!("Broken stream: invalid profile {:?}", profile))?;

    Ok(())
}

fn parse_frame_sync_code(r: &mut BitReader) -> anyhow::Result<()> {
    let sync_code = r.read_u32(24)?;

    if sync_code != SYNC_CODE {
        return Err(anyhow!(
            "Broken stream: expected sync code == {:?}, found {:?}",
            SYNC_CODE,
            sync_code
        ));
    }

    Ok(())
}

fn parse_color_config(r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
    let high_profile = matches!(hdr.profile, Profile::Profile1 | Profile::Profile3);

    if matches!(hdr.profile, Profile::Profile2 | Profile::Profile3) {
        let ten_or_twelve_bit = r.read_bool()?;
        if ten_or_twelve_bit {
            hdr.bit_depth = BitDepth::Depth12;
        } else {
            hdr.bit_depth = BitDepth::Depth10
        }
    } else {
        hdr.bit_depth = BitDepth::Depth8;
    }

    let color_space = r.read_u32(3)?;
    hdr.color_space = ColorSpace::n(color_space)
        .with_context(|| format!("Broken stream: invalid color space: {:?}", color_space))?;

    if hdr.color_space != ColorSpace::CsSrgb {
        let color_range = r.read_u32(1)?;

        hdr.color_range = ColorRange::n(color_range)
            .with_context(|| format!("Broken stream: invalid color range: {:?}", color_range))?;

        if high_profile {
            hdr.subsampling_x = r.read_bool()?;
            hdr.subsampling_y = r.read_bool()?;

            if hdr.subsampling_x && hdr.subsampling_y {
                return Err(anyhow!(
                    "Broken stream: 4:2:0 subsampling is not allowed in {:?}",
                    hdr.profile
                ));
            }

            read_reserved_zero(r)?;
        } else {
            hdr.subsampling_x = true;
            hdr.subsampling_y = true;
        }
    } else {
        hdr.color_range = ColorRange::FullSwing;

        if !high_profile {
            return Err(anyhow!(
                "Broken stream: sRGB is not allowed in {:?}",
                hdr.profile
            ));
        }

        hdr.subsampling_x = false;
        hdr.subsampling_y = false;

        read_reserved_zero(r)?;
    }

    Ok(())
}

fn parse_frame_size(r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
    hdr.width = r.read_u32(16)? + 1;
    hdr.height = r.read_u32(16)? + 1;
    Ok(())
}

fn parse_render_size(r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
    hdr.render_and_frame_size_different = r.read_bool()?;
    if hdr.render_and_frame_size_different {
        hdr.render_width = r.read_u32(16)? + 1;
        hdr.render_height = r.read_u32(16)? + 1;
    } else {
        hdr.render_width = hdr.width;
        hdr.render_height = hdr.height;
    }

    Ok(())
}

fn parse_frame_size_with_refs(
    r: &mut BitReader,
    hdr: &mut Header,
    ctx: &Context,
) -> anyhow::Result<()> {
    let mut found_ref = false;

    for i in 0..REFS_PER_FRAME {
        found_ref = r.read_bool()?;

        if found_ref {
            let slot = &ctx.ref_slots[usize::from(hdr.ref_frame_idx[i])];
            hdr.width = slot.frame_width;
            hdr.height = slot.frame_height;
            break;
        }
    }

    if !found_ref {
        parse_frame_size(r, hdr)?;
    }

    // At least one reference must be at most 2x larger and 16x smaller than
    // the frame in both dimensions.
    let has_valid_ref = hdr.ref_frame_idx.iter().any(|idx| {
        let slot = &ctx.ref_slots[usize::from(*idx)];
        2 * hdr.width >= slot.frame_width
            && 2 * hdr.height >= slot.frame_height
            && hdr.width <= 16 * slot.frame_width
            && hdr.height <= 16 * slot.frame_height
    });

    if !has_valid_ref {
        return Err(anyhow!(
            "Broken stream: no reference frame can be scaled to {}x{}",
            hdr.width,
            hdr.height
        ));
    }

    parse_render_size(r, hdr)
}

fn read_interpolation_filter(r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
    const LITERAL_TO_TYPE: [InterpolationFilter; 4] = [
        InterpolationFilter::EightTapSmooth,
        InterpolationFilter::EightTap,
        InterpolationFilter::EightTapSharp,
        InterpolationFilter::Bilinear,
    ];

    let is_filter_switchable = r.read_bool()?;

    if is_filter_switchable {
        hdr.interpolation_filter = InterpolationFilter::Switchable;
    } else {
        let raw_interpolation_filter = r.read_u32(2)?;
        hdr.interpolation_filter = LITERAL_TO_TYPE[raw_interpolation_filter as usize];
    }

    Ok(())
}

/// Forgets everything previous frames set up that this frame must not depend
/// on, and loads the default probabilities into the frame contexts that need
/// resetting.
fn setup_past_independence(ctx: &mut Context, hdr: &mut Header) {
    ctx.seg.feature_enabled = Default::default();
    ctx.seg.feature_data = Default::default();
    ctx.seg.abs_or_delta_update = false;

    ctx.lf.delta_enabled = true;
    ctx.lf.ref_deltas[ReferenceFrameType::Intra as usize] = 1;
    ctx.lf.ref_deltas[ReferenceFrameType::Last as usize] = 0;
    ctx.lf.ref_deltas[ReferenceFrameType::Golden as usize] = -1;
    ctx.lf.ref_deltas[ReferenceFrameType::AltRef as usize] = -1;
    ctx.lf.mode_deltas = Default::default();

    hdr.ref_frame_sign_bias = Default::default();
    hdr.frame_context = FrameContext::default();

    if hdr.is_keyframe() || hdr.error_resilient_mode || hdr.reset_frame_context == 3 {
        for manager in ctx.frame_context_managers.iter_mut() {
            manager.update(hdr.frame_context.clone());
        }
    } else if hdr.reset_frame_context == 2 {
        ctx.frame_context_managers[usize::from(hdr.frame_context_idx)]
            .update(hdr.frame_context.clone());
    }

    hdr.frame_context_idx = 0;
}

fn parse_loop_filter_params(r: &mut BitReader, lf: &mut LoopFilterParams) -> anyhow::Result<()> {
    lf.level = r.read_u8(6)?;
    lf.sharpness = r.read_u8(3)?;
    lf.delta_enabled = r.read_bool()?;
    lf.delta_update = false;
    lf.update_ref_delta = Default::default();
    lf.update_mode_delta = Default::default();

    if lf.delta_enabled {
        lf.delta_update = r.read_bool()?;
        if lf.delta_update {
            for i in 0..MAX_REF_LF_DELTAS {
                lf.update_ref_delta[i] = r.read_bool()?;
                if lf.update_ref_delta[i] {
                    lf.ref_deltas[i] = read_signed_8(r, 6)?;
                }
            }

            for i in 0..MAX_MODE_LF_DELTAS {
                lf.update_mode_delta[i] = r.read_bool()?;
                if lf.update_mode_delta[i] {
                    lf.mode_deltas[i] = read_signed_8(r, 6)?;
                }
            }
        }
    }

    Ok(())
}

fn read_delta_q(r: &mut BitReader, value: &mut i8) -> anyhow::Result<()> {
    let delta_coded = r.read_bool()?;

    if delta_coded {
        *value = read_signed_8(r, 4)?;
    } else {
        *value = 0;
    }

    Ok(())
}

fn parse_quantization_params(r: &mut BitReader, quant: &mut QuantizationParams) -> anyhow::Result<()> {
    quant.base_q_idx = r.read_u8(8)?;

    read_delta_q(r, &mut quant.delta_q_y_dc)?;
    read_delta_q(r, &mut quant.delta_q_uv_dc)?;
    read_delta_q(r, &mut quant.delta_q_uv_ac)?;

    Ok(())
}

fn read_prob(r: &mut BitReader) -> anyhow::Result<u8> {
    let prob_coded = r.read_bool()?;

    let prob = if prob_coded { r.read_u8(8)? } else { 255 };

    Ok(prob)
}

fn parse_segmentation_params(
    r: &mut BitReader,
    seg: &mut SegmentationParams,
) -> anyhow::Result<()> {
    const SEGMENTATION_FEATURE_BITS: [u8; SEG_LVL_MAX] = [8, 6, 2, 0];
    const SEGMENTATION_FEATURE_SIGNED: [bool; SEG_LVL_MAX] = [true, true, false, false];

    seg.update_map = false;
    seg.update_data = false;

    seg.enabled = r.read_bool()?;

    if !seg.enabled {
        return Ok(());
    }

    seg.update_map = r.read_bool()?;

    if seg.update_map {
        for i in 0..SEG_TREE_PROBS {
            seg.tree_probs[i] = read_prob(r)?;
        }

        seg.temporal_update = r.read_bool()?;

        for i in 0..PREDICTION_PROBS {
            seg.pred_probs[i] = if seg.temporal_update {
                read_prob(r)?
            } else {
                255
            };
        }
    }

    seg.update_data = r.read_bool()?;

    if seg.update_data {
        seg.abs_or_delta_update = r.read_bool()?;
        for i in 0..MAX_SEGMENTS {
            for j in 0..SEG_LVL_MAX {
                let mut feature_value = 0;

                seg.feature_enabled[i][j] = r.read_bool()?;
                if seg.feature_enabled[i][j] {
                    let bits_to_read = SEGMENTATION_FEATURE_BITS[j];
                    if bits_to_read > 0 {
                        feature_value = r.read_u16(bits_to_read)? as i16;
                    }

                    if SEGMENTATION_FEATURE_SIGNED[j] {
                        let feature_sign = r.read_bool()?;

                        if feature_sign {
                            feature_value = -feature_value;
                        }
                    }
                }

                seg.feature_data[i][j] = feature_value;
            }
        }
    }

    Ok(())
}

pub(crate) fn calc_min_log2_tile_cols(sb64_cols: u32) -> u8 {
    let mut min_log2 = 0;

    while (MAX_TILE_WIDTH_B64 << min_log2) < sb64_cols {
        min_log2 += 1;
    }

    min_log2
}

pub(crate) fn calc_max_log2_tile_cols(sb64_cols: u32) -> u8 {
    let mut max_log2 = 1;

    while (sb64_cols >> max_log2) >= MIN_TILE_WIDTH_B64 {
        max_log2 += 1;
    }

    max_log2 - 1
}

fn parse_tile_info(r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
    let mi_cols = (hdr.width + 7) >> 3;
    let sb64_cols = (mi_cols + 7) >> 3;

    let min_log2_tile_cols = calc_min_log2_tile_cols(sb64_cols);
    let max_log2_tile_cols = calc_max_log2_tile_cols(sb64_cols);

    hdr.tile_cols_log2 = min_log2_tile_cols;

    while hdr.tile_cols_log2 < max_log2_tile_cols {
        let increment_tile_cols_log2 = r.read_bool()?;

        if increment_tile_cols_log2 {
            hdr.tile_cols_log2 += 1;
        } else {
            break;
        }
    }

    hdr.tile_rows_log2 = r.read_u8(1)?;

    if hdr.tile_rows_log2 > 0 {
        let increment_tile_rows_log2 = r.read_bool()?;
        hdr.tile_rows_log2 += increment_tile_rows_log2 as u8;
    }

    Ok(())
}

/// Checks that the bits up to the next byte boundary are zero and returns the
/// number of bytes read so far.
fn parse_trailing_bits(r: &mut BitReader) -> anyhow::Result<u16> {
    let misalignment = (r.position() % 8) as u8;

    if misalignment != 0 && r.read_u8(8 - misalignment)? != 0 {
        return Err(anyhow!("Broken stream: trailing bits are not zero"));
    }

    u16::try_from(r.position() / 8).context("Broken stream: uncompressed header is too large")
}

fn parse_show_existing_frame(
    r: &mut BitReader,
    ctx: &Context,
    hdr: &mut Header,
) -> anyhow::Result<()> {
    hdr.frame_to_show_map_idx = r.read_u8(REF_FRAMES_LOG2 as u8)?;
    hdr.show_frame = true;

    let slot = &ctx.ref_slots[usize::from(hdr.frame_to_show_map_idx)];
    if !slot.initialized {
        return Err(anyhow!(
            "Broken stream: cannot show uninitialized reference frame {}",
            hdr.frame_to_show_map_idx
        ));
    }

    hdr.width = slot.frame_width;
    hdr.height = slot.frame_height;
    hdr.render_width = slot.frame_width;
    hdr.render_height = slot.frame_height;
    hdr.bit_depth = slot.bit_depth;
    hdr.color_space = slot.color_space;
    hdr.subsampling_x = slot.subsampling_x;
    hdr.subsampling_y = slot.subsampling_y;

    hdr.uncompressed_header_size_in_bytes = parse_trailing_bits(r)?;

    Ok(())
}

/// Parses the references of an inter frame, which must all hold frames with
/// the color format of the current one.
fn parse_refs(r: &mut BitReader, ctx: &Context, hdr: &mut Header) -> anyhow::Result<()> {
    for i in 0..REFS_PER_FRAME {
        let idx = r.read_u8(REF_FRAMES_LOG2 as u8)?;
        hdr.ref_frame_idx[i] = idx;
        hdr.ref_frame_sign_bias[ReferenceFrameType::Last as usize + i] = r.read_u8(1)?;

        let slot = &ctx.ref_slots[usize::from(idx)];

        if !slot.initialized {
            return Err(anyhow!(
                "Broken stream: reference frame {} is not initialized",
                idx
            ));
        }

        if slot.bit_depth != hdr.bit_depth {
            return Err(anyhow!(
                "Broken stream: reference frame {} is {:?}, but the frame is {:?}",
                idx,
                slot.bit_depth,
                hdr.bit_depth
            ));
        }

        if slot.subsampling_x != hdr.subsampling_x || slot.subsampling_y != hdr.subsampling_y {
            return Err(anyhow!(
                "Broken stream: reference frame {} has a different chroma subsampling",
                idx
            ));
        }
    }

    Ok(())
}

fn save_color_config(ctx: &mut Context, hdr: &Header) {
    ctx.color_config = ColorConfig {
        bit_depth: hdr.bit_depth,
        color_space: hdr.color_space,
        color_range: hdr.color_range,
        subsampling_x: hdr.subsampling_x,
        subsampling_y: hdr.subsampling_y,
    };
}

/// Parses the uncompressed header at the start of `data`.
///
/// The loop filter and segmentation parameters of `ctx` are updated with what
/// the frame carries, and frame contexts are reset if the frame requests it.
pub(crate) fn parse_uncompressed_header(data: &[u8], ctx: &mut Context) -> anyhow::Result<Header> {
    let mut r = BitReader::new(data);
    let mut hdr = Header::default();

    parse_frame_marker(&mut r)?;
    parse_profile(&mut r, &mut hdr)?;

    hdr.show_existing_frame = r.read_bool()?;

    if hdr.show_existing_frame {
        parse_show_existing_frame(&mut r, ctx, &mut hdr)?;
        return Ok(hdr);
    }

    hdr.frame_type =
        FrameType::n(r.read_u8(1)?).ok_or(anyhow!("Broken data: invalid frame type"))?;

    hdr.show_frame = r.read_bool()?;
    hdr.error_resilient_mode = r.read_bool()?;

    if hdr.frame_type == FrameType::KeyFrame {
        parse_frame_sync_code(&mut r)?;
        parse_color_config(&mut r, &mut hdr)?;
        save_color_config(ctx, &hdr);
        parse_frame_size(&mut r, &mut hdr)?;
        parse_render_size(&mut r, &mut hdr)?;
        hdr.refresh_frame_flags = 0xff;
    } else {
        if !hdr.show_frame {
            hdr.intra_only = r.read_bool()?;
        }

        if !hdr.error_resilient_mode {
            hdr.reset_frame_context = r.read_u8(2)?;
        } else {
            hdr.reset_frame_context = 0;
        }

        if hdr.intra_only {
            parse_frame_sync_code(&mut r)?;

            if hdr.profile != Profile::Profile0 {
                parse_color_config(&mut r, &mut hdr)?;
            } else {
                hdr.color_space = ColorSpace::Bt601;
                hdr.subsampling_x = true;
                hdr.subsampling_y = true;
                hdr.bit_depth = BitDepth::Depth8;
            }

            save_color_config(ctx, &hdr);

            hdr.refresh_frame_flags = r.read_u8(8)?;
            parse_frame_size(&mut r, &mut hdr)?;
            parse_render_size(&mut r, &mut hdr)?;
        } else {
            // Inter frames carry the color config of the last intra frame.
            hdr.color_space = ctx.color_config.color_space;
            hdr.color_range = ctx.color_config.color_range;
            hdr.subsampling_x = ctx.color_config.subsampling_x;
            hdr.subsampling_y = ctx.color_config.subsampling_y;
            hdr.bit_depth = ctx.color_config.bit_depth;

            hdr.refresh_frame_flags = r.read_u8(8)?;

            parse_refs(&mut r, ctx, &mut hdr)?;
            parse_frame_size_with_refs(&mut r, &mut hdr, ctx)?;
            hdr.allow_high_precision_mv = r.read_bool()?;
            read_interpolation_filter(&mut r, &mut hdr)?;
        }
    }

    if !hdr.error_resilient_mode {
        hdr.refresh_frame_context = r.read_bool()?;
        hdr.frame_parallel_decoding_mode = r.read_bool()?;
    } else {
        hdr.refresh_frame_context = false;
        hdr.frame_parallel_decoding_mode = true;
    }

    hdr.frame_context_idx = r.read_u8(FRAME_CONTEXTS_LOG2 as u8)?;

    if hdr.is_intra() || hdr.error_resilient_mode {
        setup_past_independence(ctx, &mut hdr);
    }

    parse_loop_filter_params(&mut r, &mut ctx.lf)?;
    parse_quantization_params(&mut r, &mut hdr.quant)?;
    parse_segmentation_params(&mut r, &mut ctx.seg)?;
    parse_tile_info(&mut r, &mut hdr)?;

    hdr.lossless = hdr.quant.is_lossless();
    hdr.header_size_in_bytes = r.read_u16(16)?;

    hdr.lf = ctx.lf.clone();
    hdr.seg = ctx.seg.clone();

    hdr.uncompressed_header_size_in_bytes = parse_trailing_bits(&mut r)?;

    Ok(hdr)
}
