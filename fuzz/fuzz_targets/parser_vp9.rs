#![no_main]

use cros_vp9_parser::codec::vp9::parser::ParseStatus;
use cros_vp9_parser::codec::vp9::parser::Parser;
use cros_vp9_parser::codec::vp9::parser::NUM_FRAME_CONTEXTS;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut parser = Parser::default();

    // The first byte picks how many bytes go in each chunk fed to the parser.
    let Some((chunk_size, data)) = data.split_first() else {
        return;
    };
    let chunk_size = usize::from(*chunk_size).max(1) * 16;

    for chunk in data.chunks(chunk_size) {
        parser.set_stream(chunk);

        loop {
            match parser.parse_next_frame() {
                Ok(ParseStatus::Frame(header)) => {
                    if !header.refresh_frame_context || header.frame_parallel_decoding_mode {
                        continue;
                    }

                    // Hand back the probabilities as if the decoder had not
                    // adapted them.
                    let idx = usize::from(header.frame_context_idx);
                    if let Some(cb) = parser.context_refresh_cb(idx) {
                        cb(header.frame_context);
                    }
                }
                Ok(ParseStatus::AwaitingRefresh) => {
                    for idx in 0..NUM_FRAME_CONTEXTS {
                        if let Some(cb) = parser.context_refresh_cb(idx) {
                            cb(Default::default());
                        }
                    }
                }
                Ok(ParseStatus::EndOfStream) | Err(_) => break,
            }
        }
    }
});
