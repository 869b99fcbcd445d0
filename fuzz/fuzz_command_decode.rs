//! Fuzz target for command decoding and stream framing.
//!
//! Run with: cargo +nightly fuzz run fuzz_command_decode
//!
//! The first byte picks a read size; the rest is fed to a `FrameDecoder`
//! in chunks of that size, the way the daemon reads its inbound FIFO.

#![no_main]

use gpiod_core::protocol::{Command, FrameDecoder};
use libfuzzer_sys::fuzz_target;

const LIMIT: usize = 256;

fuzz_target!(|data: &[u8]| {
    let Some((&first, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(first).max(1);

    if let Ok(command) = Command::from_slice(stream) {
        assert_eq!(Command::from_value(&command.to_value()), Ok(command));
    }

    let mut decoder = FrameDecoder::new(LIMIT);
    for piece in stream.chunks(chunk) {
        for frame in decoder.push(piece) {
            if let Ok(value) = frame {
                let _ = Command::from_value(&value);
            }
        }
        assert!(decoder.pending() <= LIMIT);
    }
});
