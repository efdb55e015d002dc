//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary UTF-8 to `AppConfig::parse()` looking for panics or hangs
//! in parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = lnprototest_config::AppConfig::parse(s) {
            // Anything that parses must also validate and render.
            assert!(config.validate().is_ok());
            let _ = toml::to_string(&config);
        }
    }
});
