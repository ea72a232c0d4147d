// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsing of the VP9 compressed header, which carries probability deltas
//! coded with the boolean decoder.

use anyhow::anyhow;
use anyhow::Context as AnyhowContext;

use crate::codec::vp9::bool_decoder::BoolDecoder;
use crate::codec::vp9::parser::Header;
use crate::codec::vp9::parser::InterpolationFilter;
use crate::codec::vp9::parser::ReferenceFrameType;
use crate::codec::vp9::parser::ReferenceMode;
use crate::codec::vp9::parser::TxMode;
use crate::codec::vp9::parser::ALTREF_FRAME;
use crate::codec::vp9::parser::GOLDEN_FRAME;
use crate::codec::vp9::parser::LAST_FRAME;
use crate::codec::vp9::parser::REFS_PER_FRAME;
use crate::codec::vp9::probs::FrameContext;
use crate::codec::vp9::probs::BAND_0_COEF_CONTEXTS;
use crate::codec::vp9::probs::COEF_BANDS;
use crate::codec::vp9::probs::PLANE_TYPES;
use crate::codec::vp9::probs::PREV_COEF_CONTEXTS;
use crate::codec::vp9::probs::REF_TYPES;
use crate::codec::vp9::probs::UNCONSTRAINED_NODES;

/// Probability with which every optional update flag is coded.
const DIFF_UPDATE_PROB: u8 = 252;

const TX_MODE_TO_BIGGEST_TX_SIZE: [usize; 5] = [0, 1, 2, 3, 3];

/// Maps the subexponentially coded deltas back to the distance from the
/// current probability. Small indices map to coarse steps.
#[rustfmt::skip]
const INV_MAP_TABLE: [u8; 255] = [
    7, 20, 33, 46, 59, 72, 85, 98, 111, 124, 137, 150, 163, 176, 189,
    202, 215, 228, 241, 254, 1, 2, 3, 4, 5, 6, 8, 9, 10, 11,
    12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 24, 25, 26, 27,
    28, 29, 30, 31, 32, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43,
    44, 45, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 60,
    61, 62, 63, 64, 65, 66, 67, 68, 69, 70, 71, 73, 74, 75, 76,
    77, 78, 79, 80, 81, 82, 83, 84, 86, 87, 88, 89, 90, 91, 92,
    93, 94, 95, 96, 97, 99, 100, 101, 102, 103, 104, 105, 106, 107, 108,
    109, 110, 112, 113, 114, 115, 116, 117, 118, 119, 120, 121, 122, 123, 125,
    126, 127, 128, 129, 130, 131, 132, 133, 134, 135, 136, 138, 139, 140, 141,
    142, 143, 144, 145, 146, 147, 148, 149, 151, 152, 153, 154, 155, 156, 157,
    158, 159, 160, 161, 162, 164, 165, 166, 167, 168, 169, 170, 171, 172, 173,
    174, 175, 177, 178, 179, 180, 181, 182, 183, 184, 185, 186, 187, 188, 190,
    191, 192, 193, 194, 195, 196, 197, 198, 199, 200, 201, 203, 204, 205, 206,
    207, 208, 209, 210, 211, 212, 213, 214, 216, 217, 218, 219, 220, 221, 222,
    223, 224, 225, 226, 227, 229, 230, 231, 232, 233, 234, 235, 236, 237, 238,
    239, 240, 242, 243, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 253,
];

fn decode_term_subexp(bd: &mut BoolDecoder) -> anyhow::Result<u8> {
    if !bd.read_bool()? {
        return Ok(bd.read_uint(4)?);
    }

    if !bd.read_bool()? {
        return Ok(bd.read_uint::<u8>(4)? + 16);
    }

    if !bd.read_bool()? {
        return Ok(bd.read_uint::<u8>(5)? + 32);
    }

    let v = bd.read_literal(7)?;
    if v < 65 {
        return Ok((v + 64) as u8);
    }

    let bit = bd.read_literal(1)?;
    Ok(((v << 1) - 1 + bit) as u8)
}

fn inv_recenter_nonneg(v: u32, m: u32) -> u32 {
    if v > 2 * m {
        v
    } else if v & 1 != 0 {
        m - ((v + 1) >> 1)
    } else {
        m + (v >> 1)
    }
}

fn inv_remap_prob(delta: u8, prob: u8) -> u8 {
    let v = u32::from(INV_MAP_TABLE[usize::from(delta)]);
    let m = u32::from(prob).saturating_sub(1);

    let prob = if (m << 1) <= 255 {
        1 + inv_recenter_nonneg(v, m)
    } else {
        255 - inv_recenter_nonneg(v, 254 - m)
    };

    prob as u8
}

fn diff_update_prob(bd: &mut BoolDecoder, prob: &mut u8) -> anyhow::Result<()> {
    if bd.read_bool_with_prob(DIFF_UPDATE_PROB)? {
        let delta = decode_term_subexp(bd)?;
        *prob = inv_remap_prob(delta, *prob);
    }

    Ok(())
}

fn diff_update_probs<'a>(
    bd: &mut BoolDecoder,
    probs: impl IntoIterator<Item = &'a mut u8>,
) -> anyhow::Result<()> {
    for prob in probs {
        diff_update_prob(bd, prob)?;
    }

    Ok(())
}

/// Motion vector probabilities are replaced rather than adjusted, with 7 bits
/// of precision.
fn update_mv_probs<'a>(
    bd: &mut BoolDecoder,
    probs: impl IntoIterator<Item = &'a mut u8>,
) -> anyhow::Result<()> {
    for prob in probs {
        if bd.read_bool_with_prob(DIFF_UPDATE_PROB)? {
            *prob = (bd.read_uint::<u8>(7)? << 1) | 1;
        }
    }

    Ok(())
}

fn read_tx_mode(bd: &mut BoolDecoder, hdr: &mut Header) -> anyhow::Result<()> {
    if hdr.lossless {
        hdr.tx_mode = TxMode::Only4x4;
        return Ok(());
    }

    let mut tx_mode = bd.read_literal(2)?;
    if tx_mode == TxMode::Allow32x32 as u32 {
        tx_mode += bd.read_literal(1)?;
    }

    hdr.tx_mode = TxMode::n(tx_mode)
        .with_context(|| format!("Broken stream: invalid tx mode {}", tx_mode))?;

    Ok(())
}

fn read_tx_mode_probs(bd: &mut BoolDecoder, fc: &mut FrameContext) -> anyhow::Result<()> {
    diff_update_probs(bd, fc.tx_probs_8x8.iter_mut().flatten())?;
    diff_update_probs(bd, fc.tx_probs_16x16.iter_mut().flatten())?;
    diff_update_probs(bd, fc.tx_probs_32x32.iter_mut().flatten())
}

fn read_coef_probs(
    bd: &mut BoolDecoder,
    fc: &mut FrameContext,
    tx_mode: TxMode,
) -> anyhow::Result<()> {
    let max_tx_size = TX_MODE_TO_BIGGEST_TX_SIZE[tx_mode as usize];

    for tx_size in 0..=max_tx_size {
        let update_probs = bd.read_literal(1)? != 0;
        if !update_probs {
            continue;
        }

        let probs = &mut fc.coef_probs[tx_size];
        for i in 0..PLANE_TYPES {
            for j in 0..REF_TYPES {
                for k in 0..COEF_BANDS {
                    let max_l = if k == 0 {
                        BAND_0_COEF_CONTEXTS
                    } else {
                        PREV_COEF_CONTEXTS
                    };

                    for l in 0..max_l {
                        for m in 0..UNCONSTRAINED_NODES {
                            diff_update_prob(bd, &mut probs[i][j][k][l][m])?;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Picks the fixed and variable references of compound prediction: the
/// fixed one is the reference whose sign bias differs from the other two.
fn setup_compound_reference_mode(hdr: &mut Header) {
    let sign_bias = &hdr.ref_frame_sign_bias;

    if sign_bias[LAST_FRAME] == sign_bias[GOLDEN_FRAME] {
        hdr.comp_fixed_ref = ReferenceFrameType::AltRef;
        hdr.comp_var_ref = [ReferenceFrameType::Last, ReferenceFrameType::Golden];
    } else if sign_bias[LAST_FRAME] == sign_bias[ALTREF_FRAME] {
        hdr.comp_fixed_ref = ReferenceFrameType::Golden;
        hdr.comp_var_ref = [ReferenceFrameType::Last, ReferenceFrameType::AltRef];
    } else {
        hdr.comp_fixed_ref = ReferenceFrameType::Last;
        hdr.comp_var_ref = [ReferenceFrameType::Golden, ReferenceFrameType::AltRef];
    }
}

fn read_frame_reference_mode(bd: &mut BoolDecoder, hdr: &mut Header) -> anyhow::Result<()> {
    let compound_reference_allowed = (1..REFS_PER_FRAME)
        .any(|i| hdr.ref_frame_sign_bias[i + 1] != hdr.ref_frame_sign_bias[LAST_FRAME]);

    hdr.reference_mode = if compound_reference_allowed && bd.read_bool()? {
        if bd.read_bool()? {
            ReferenceMode::ReferenceModeSelect
        } else {
            ReferenceMode::CompoundReference
        }
    } else {
        ReferenceMode::SingleReference
    };

    setup_compound_reference_mode(hdr);

    Ok(())
}

fn read_frame_reference_mode_probs(bd: &mut BoolDecoder, hdr: &mut Header) -> anyhow::Result<()> {
    let fc = &mut hdr.frame_context;

    if hdr.reference_mode == ReferenceMode::ReferenceModeSelect {
        diff_update_probs(bd, fc.comp_mode_prob.iter_mut())?;
    }

    if hdr.reference_mode != ReferenceMode::CompoundReference {
        diff_update_probs(bd, fc.single_ref_prob.iter_mut().flatten())?;
    }

    if hdr.reference_mode != ReferenceMode::SingleReference {
        diff_update_probs(bd, fc.comp_ref_prob.iter_mut())?;
    }

    Ok(())
}

fn read_mv_probs(
    bd: &mut BoolDecoder,
    fc: &mut FrameContext,
    allow_high_precision_mv: bool,
) -> anyhow::Result<()> {
    update_mv_probs(bd, fc.mv_joint_probs.iter_mut())?;

    for i in 0..2 {
        update_mv_probs(bd, std::iter::once(&mut fc.mv_sign_prob[i]))?;
        update_mv_probs(bd, fc.mv_class_probs[i].iter_mut())?;
        update_mv_probs(bd, std::iter::once(&mut fc.mv_class0_bit_prob[i]))?;
        update_mv_probs(bd, fc.mv_bits_prob[i].iter_mut())?;
    }

    for i in 0..2 {
        update_mv_probs(bd, fc.mv_class0_fr_probs[i].iter_mut().flatten())?;
        update_mv_probs(bd, fc.mv_fr_probs[i].iter_mut())?;
    }

    if allow_high_precision_mv {
        for i in 0..2 {
            update_mv_probs(bd, std::iter::once(&mut fc.mv_class0_hp_prob[i]))?;
            update_mv_probs(bd, std::iter::once(&mut fc.mv_hp_prob[i]))?;
        }
    }

    Ok(())
}

/// Parses the compressed header in `data`, applying its probability deltas to
/// `hdr.frame_context`, which must hold the frame context selected by the
/// uncompressed header.
pub(crate) fn parse_compressed_header(data: &[u8], hdr: &mut Header) -> anyhow::Result<()> {
    let mut bd = BoolDecoder::new(data)?;

    read_tx_mode(&mut bd, hdr)?;

    if hdr.tx_mode == TxMode::TxModeSelect {
        read_tx_mode_probs(&mut bd, &mut hdr.frame_context)?;
    }

    read_coef_probs(&mut bd, &mut hdr.frame_context, hdr.tx_mode)?;
    diff_update_probs(&mut bd, hdr.frame_context.skip_prob.iter_mut())?;

    if !hdr.is_intra() {
        let fc = &mut hdr.frame_context;
        diff_update_probs(&mut bd, fc.inter_mode_probs.iter_mut().flatten())?;

        if hdr.interpolation_filter == InterpolationFilter::Switchable {
            diff_update_probs(&mut bd, fc.interp_filter_probs.iter_mut().flatten())?;
        }

        diff_update_probs(&mut bd, fc.is_inter_prob.iter_mut())?;

        read_frame_reference_mode(&mut bd, hdr)?;
        read_frame_reference_mode_probs(&mut bd, hdr)?;

        let fc = &mut hdr.frame_context;
        diff_update_probs(&mut bd, fc.y_mode_probs.iter_mut().flatten())?;
        diff_update_probs(&mut bd, fc.partition_probs.iter_mut().flatten())?;

        read_mv_probs(&mut bd, fc, hdr.allow_high_precision_mv)?;
    }

    if !bd.padding_is_zero() {
        return Err(anyhow!("Broken stream: compressed header padding is not zero"));
    }

    Ok(())
}
