// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod bool_decoder;
#[cfg(test)]
pub(crate) mod bool_encoder;
mod compressed_header;
pub mod context;
pub mod lookups;
pub mod parser;
pub mod probs;
pub mod superframe;
#[cfg(test)]
pub(crate) mod test_utils;
mod uncompressed_header;
