// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use byteorder::ByteOrder;
use byteorder::LittleEndian;
use log::debug;
use thiserror::Error;

pub const SUPERFRAME_MARKER: u8 = 0xc0;
pub const SUPERFRAME_MARKER_MASK: u8 = 0xe0;

/// The location of a single frame within a chunk of VP9 data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Offset of the frame from the start of the chunk.
    pub offset: usize,
    /// Size of the frame in bytes.
    pub size: usize,
}

impl FrameInfo {
    /// Returns the bytes of this frame within `chunk`.
    pub fn data<'a>(&self, chunk: &'a [u8]) -> &'a [u8] {
        &chunk[self.offset..self.offset + self.size]
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SuperframeError {
    #[error("superframe index of {index_size} bytes does not fit in a {len} bytes chunk")]
    IndexTooLarge { index_size: usize, len: usize },
    #[error("superframe index starts with {found:#04x}, expected marker {marker:#04x}")]
    MarkerMismatch { marker: u8, found: u8 },
    #[error("frame {frame} is {size} bytes, but only {remaining} bytes are left")]
    FrameTooLarge {
        frame: usize,
        size: usize,
        remaining: usize,
    },
}

/// Splits a chunk of VP9 data into its frames, as described by the superframe
/// index (Annex B) if the chunk carries one.
///
/// An empty chunk yields no frames. A chunk without a superframe index is a
/// single frame.
pub fn split_superframe(data: &[u8]) -> Result<Vec<FrameInfo>, SuperframeError> {
    let marker = match data.last() {
        Some(marker) => *marker,
        None => return Ok(vec![]),
    };

    if marker & SUPERFRAME_MARKER_MASK != SUPERFRAME_MARKER {
        return Ok(vec![FrameInfo {
            offset: 0,
            size: data.len(),
        }]);
    }

    let num_frames = usize::from(marker & 0x7) + 1;
    let mag = usize::from((marker >> 3) & 0x3) + 1;
    let index_size = 2 + mag * num_frames;

    if data.len() < index_size {
        return Err(SuperframeError::IndexTooLarge {
            index_size,
            len: data.len(),
        });
    }

    let index_start = data.len() - index_size;
    let first_byte = data[index_start];
    if first_byte != marker {
        return Err(SuperframeError::MarkerMismatch {
            marker,
            found: first_byte,
        });
    }

    debug!(
        "Superframe with {} frames, {} bytes per frame size",
        num_frames, mag
    );

    let sizes = &data[index_start + 1..data.len() - 1];
    let mut remaining = index_start;
    let mut offset = 0;
    let mut frames = Vec::with_capacity(num_frames);

    for (frame, raw_size) in sizes.chunks_exact(mag).enumerate() {
        let size = LittleEndian::read_uint(raw_size, mag) as usize;

        if size > remaining {
            return Err(SuperframeError::FrameTooLarge {
                frame,
                size,
                remaining,
            });
        }

        frames.push(FrameInfo { offset, size });
        offset += size;
        remaining -= size;
    }

    Ok(frames)
}
