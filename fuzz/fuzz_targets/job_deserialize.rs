#![no_main]

use draftmill_types::{Block, Job, JobLogEntry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Stored documents must roundtrip; garbage must never panic.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(job) = serde_json::from_str::<Job>(text) {
            let encoded = serde_json::to_string(&job).expect("serialize");
            let back: Job = serde_json::from_str(&encoded).expect("reparse");
            assert_eq!(back.id, job.id);
            assert_eq!(back.status, job.status);
            assert_eq!(back.log.len(), job.log.len());
        }
        let _ = serde_json::from_str::<Block>(text);
        let _ = serde_json::from_str::<JobLogEntry>(text);
    }
});
