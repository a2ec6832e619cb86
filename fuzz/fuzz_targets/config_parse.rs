//! Fuzz target for context configuration parsing
//!
//! Arbitrary TOML must be rejected with an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use verse_core::ContextConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = ContextConfig::from_toml_str(text) {
            // Anything accepted must render and parse back identically
            let rendered = config.to_toml_string().unwrap();
            assert_eq!(ContextConfig::from_toml_str(&rendered).unwrap(), config);
            let _ = config.max_batch_payload();
        }
    }
});
