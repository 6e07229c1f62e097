#![no_main]

use draftmill_retry::{BackoffConfig, delay_for_attempt};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any config deserialized from JSON must yield bounded, panic-free
    // delays for any attempt number.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = serde_json::from_str::<BackoffConfig>(text) {
            for attempt in [0u32, 1, 2, 3, 17, u32::MAX] {
                let delay = delay_for_attempt(&config, attempt);
                if config.jitter <= 0.0 {
                    assert!(delay <= config.max_delay);
                }
            }
        }
    }
});
