#![no_main]

use draftmill_encrypt::{Vault, is_encrypted};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let vault = Vault::from_secret("fuzz-secret-fuzz-secret-fuzz-secret!");

    // Arbitrary input must never panic; non-envelope input passes through.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(decrypted) = vault.decrypt(text) {
            if !is_encrypted(text) {
                assert_eq!(decrypted, text);
            }
        }

        // Roundtrip for anything encryptable.
        if let Ok(stored) = vault.encrypt(text) {
            assert!(is_encrypted(&stored));
            let back = vault.decrypt(&stored).expect("own envelope decrypts");
            assert_eq!(back, text);
        }
    }
});
