#![no_main]

use draftmill_providers::html::extract;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Scraped pages are hostile input; extraction must never panic and
    // the word count must agree with the text it reports.
    if let Ok(text) = std::str::from_utf8(data) {
        let page = extract(text);
        assert_eq!(page.word_count as usize, page.text.split_whitespace().count());
    }
});
