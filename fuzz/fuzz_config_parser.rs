//! Fuzz target for `AppConfig::parse`.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = gpiod_config::AppConfig::parse(s) {
        // Anything that parses has passed validation.
        assert_ne!(config.pipes.inbound_path, config.pipes.outbound_path);
        assert!(config.pipes.max_message_bytes > 0);
    }
});
