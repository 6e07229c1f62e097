#![no_main]

use draftmill_encrypt::mask;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let masked = mask(text);
        let chars = text.chars().count();
        let masked_chars = masked.chars().count();
        if chars <= 8 {
            assert_eq!(masked, text);
        } else {
            // First and last four characters survive; stars are capped.
            assert!(masked_chars <= 8 + 20);
            assert!(masked.starts_with(&text.chars().take(4).collect::<String>()));
        }
    }
});
