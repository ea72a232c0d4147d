// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! State that survives from one VP9 frame to the next: the four probability
//! frame contexts, the eight reference slots and the loop filter and
//! segmentation parameters that the bitstream only updates partially.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use log::debug;
use log::warn;

use crate::codec::vp9::parser::BitDepth;
use crate::codec::vp9::parser::ColorRange;
use crate::codec::vp9::parser::ColorSpace;
use crate::codec::vp9::parser::LoopFilterParams;
use crate::codec::vp9::parser::Profile;
use crate::codec::vp9::parser::SegmentationParams;
use crate::codec::vp9::parser::NUM_FRAME_CONTEXTS;
use crate::codec::vp9::parser::NUM_REF_FRAMES;
use crate::codec::vp9::probs::FrameContext;

/// Callback used to hand an adapted frame context back to the parser. Running
/// it after the context it was issued for has been superseded does nothing.
pub type ContextRefreshCb = Box<dyn FnOnce(FrameContext) + Send>;

#[derive(Debug, Default)]
struct ManagerState {
    initialized: bool,
    needs_client_update: bool,
    /// Bumped every time the stored context is replaced or reset internally.
    /// Refresh callbacks issued for an older generation are ignored.
    generation: u64,
    frame_context: FrameContext,
    rejected_client_updates: u64,
}

/// Keeps one of the four frame contexts of a stream, and tracks whether its
/// contents are owed by the client after backward adaptation.
#[derive(Debug, Default)]
pub struct FrameContextManager {
    state: Arc<Mutex<ManagerState>>,
}

impl FrameContextManager {
    /// Whether a frame context was ever stored or promised for this slot.
    pub fn initialized(&self) -> bool {
        self.state.lock().unwrap().initialized
    }

    /// Whether the client still has to provide the adapted context.
    pub fn needs_client_update(&self) -> bool {
        self.state.lock().unwrap().needs_client_update
    }

    /// Number of client updates dropped because they carried an invalid
    /// context.
    pub fn rejected_client_updates(&self) -> u64 {
        self.state.lock().unwrap().rejected_client_updates
    }

    /// Returns a copy of the stored frame context.
    ///
    /// Panics if the context is not initialized or is awaiting a client update.
    pub fn frame_context(&self) -> FrameContext {
        let state = self.state.lock().unwrap();
        assert!(state.initialized, "frame context is not initialized");
        assert!(!state.needs_client_update, "frame context is awaiting a client update");

        state.frame_context.clone()
    }

    pub fn reset(&mut self) {
        let mut state = self.state.lock().unwrap();
        let generation = state.generation + 1;
        *state = ManagerState {
            generation,
            ..Default::default()
        };
    }

    /// Marks the context as owed by the client. The context counts as
    /// initialized from now on.
    pub fn set_needs_client_update(&mut self) {
        let mut state = self.state.lock().unwrap();
        assert!(!state.needs_client_update, "a client update is already pending");

        state.needs_client_update = true;
        state.initialized = true;
    }

    /// Returns the callback through which the client provides the adapted
    /// context, or `None` if no update is pending.
    pub fn update_cb(&self) -> Option<ContextRefreshCb> {
        let state = self.state.lock().unwrap();
        if !state.needs_client_update {
            return None;
        }

        let weak = Arc::downgrade(&self.state);
        let generation = state.generation;

        Some(Box::new(move |frame_context| {
            Self::update_from_client(&weak, generation, frame_context)
        }))
    }

    /// Stores a context computed by the parser itself, superseding any
    /// callback issued so far.
    ///
    /// Panics if `frame_context` is not valid.
    pub fn update(&mut self, frame_context: FrameContext) {
        assert!(frame_context.is_valid(), "invalid frame context");

        let mut state = self.state.lock().unwrap();
        state.frame_context = frame_context;
        state.initialized = true;
        state.needs_client_update = false;
        state.generation += 1;
    }

    fn update_from_client(
        state: &Weak<Mutex<ManagerState>>,
        generation: u64,
        frame_context: FrameContext,
    ) {
        let Some(state) = state.upgrade() else {
            debug!("Dropping frame context refresh, the parser is gone");
            return;
        };

        let mut state = state.lock().unwrap();
        if state.generation != generation {
            debug!(
                "Dropping stale frame context refresh (generation {}, current {})",
                generation, state.generation
            );
            return;
        }

        if !frame_context.is_valid() {
            warn!("Client provided an invalid frame context, ignoring it");
            state.rejected_client_updates += 1;
            return;
        }

        state.frame_context = frame_context;
        state.initialized = true;
        state.needs_client_update = false;
    }
}

/// What the parser knows about the frame last stored in a reference slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceSlot {
    pub initialized: bool,
    pub frame_width: u32,
    pub frame_height: u32,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub bit_depth: BitDepth,
    pub profile: Profile,
    pub color_space: ColorSpace,
}

/// The color configuration of the last intra frame, which inter frames
/// inherit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ColorConfig {
    pub bit_depth: BitDepth,
    pub color_space: ColorSpace,
    pub color_range: ColorRange,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
}

/// The persistent state of a VP9 stream.
#[derive(Debug, Default)]
pub struct Context {
    pub(crate) frame_context_managers: [FrameContextManager; NUM_FRAME_CONTEXTS],
    pub(crate) ref_slots: [ReferenceSlot; NUM_REF_FRAMES],
    pub(crate) lf: LoopFilterParams,
    pub(crate) seg: SegmentationParams,
    pub(crate) color_config: ColorConfig,
}

impl Context {
    pub fn reset(&mut self) {
        for manager in self.frame_context_managers.iter_mut() {
            manager.reset();
        }

        self.ref_slots = Default::default();
        self.lf = Default::default();
        self.seg = Default::default();
        self.color_config = Default::default();
    }

    pub fn frame_context_manager(&self, idx: usize) -> &FrameContextManager {
        &self.frame_context_managers[idx]
    }

    pub fn ref_slot(&self, idx: usize) -> &ReferenceSlot {
        &self.ref_slots[idx]
    }

    /// The loop filter parameters as persisted across frames.
    pub fn loop_filter(&self) -> &LoopFilterParams {
        &self.lf
    }

    /// The segmentation parameters as persisted across frames.
    pub fn segmentation(&self) -> &SegmentationParams {
        &self.seg
    }

    pub(crate) fn update_ref_slot(&mut self, idx: usize, slot: ReferenceSlot) {
        debug!("Replacing reference slot {}", idx);
        self.ref_slots[idx] = slot;
    }
}
