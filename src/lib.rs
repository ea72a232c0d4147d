// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateful parsing of VP9 frame headers.
//!
//! [`codec::vp9::parser::Parser`] splits superframes, parses the uncompressed
//! and compressed headers of each frame and keeps the state later frames
//! depend on, including the probability contexts that clients refresh after
//! decoding.

pub mod codec;
