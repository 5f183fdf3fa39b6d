//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = codebox_config::AppConfig::parse(s) {
            // Anything that parses must also have passed validation.
            assert_ne!(config.server.listen_port, 0);
        }
    }
});
