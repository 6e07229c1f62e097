//! Credential encryption using AES-256-GCM.
//!
//! Provider credentials are stored as authenticated-encryption envelopes in
//! the form `nonce:tag:ciphertext`, each segment base64-encoded. The
//! three-segment shape doubles as the is-encrypted discriminator: values
//! that do not match it are legacy plaintext and pass through decryption
//! unchanged.
//!
//! ## Usage
//!
//! ```
//! use draftmill_encrypt::Vault;
//!
//! let vault = Vault::from_secret("a-token-signing-secret-of-enough-length");
//! let stored = vault.encrypt("sk-or-v1-abcdef").expect("encrypt");
//! assert_eq!(stored.split(':').count(), 3);
//! assert_eq!(vault.decrypt(&stored).expect("decrypt"), "sk-or-v1-abcdef");
//! ```
//!
//! ## Security
//!
//! - AES-256-GCM authenticated encryption, fresh random 96-bit nonce per
//!   ciphertext
//! - Key is either a configured raw 32-byte key or derived from the
//!   token-signing secret via PBKDF2-SHA256 (100,000 iterations, fixed
//!   salt, so the key is stable across restarts)
//! - The GCM tag is the integrity check between writer and reader

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac_array;
use sha2::Sha256;

/// Size of the AES-GCM nonce (96 bits).
const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag.
const TAG_SIZE: usize = 16;
/// Size of the derived key (256 bits for AES-256).
const KEY_SIZE: usize = 32;
/// Number of PBKDF2 iterations for secret-derived keys.
const PBKDF2_ITERATIONS: u32 = 100_000;
/// Fixed salt for secret-derived keys. Deliberately constant: the same
/// secret must derive the same key on every process start.
const KDF_SALT: &[u8] = b"draftmill-credential-vault-v1";

/// Errors produced by envelope operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("decryption failed: wrong key or corrupted envelope")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("decrypted credential is not valid UTF-8")]
    NotUtf8,
}

/// Authenticated symmetric cipher over provider credentials.
#[derive(Clone)]
pub struct Vault {
    key: [u8; KEY_SIZE],
}

impl Vault {
    /// Create a vault from an explicit raw 32-byte key.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Derive the vault key from the token-signing secret.
    pub fn from_secret(secret: &str) -> Self {
        let key = pbkdf2_hmac_array::<Sha256, KEY_SIZE>(
            secret.as_bytes(),
            KDF_SALT,
            PBKDF2_ITERATIONS,
        );
        Self { key }
    }

    /// Encrypt a credential into its stored envelope form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| VaultError::Encrypt)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;

        // aes-gcm appends the tag to the ciphertext; split it back out so
        // the stored form is nonce:tag:ciphertext.
        let split = sealed.len() - TAG_SIZE;
        let (ciphertext, tag) = sealed.split_at(split);

        Ok(format!(
            "{}:{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(tag),
            BASE64.encode(ciphertext)
        ))
    }

    /// Decrypt a stored value.
    ///
    /// Values that do not have the three-segment envelope shape are legacy
    /// plaintext and are returned unchanged.
    pub fn decrypt(&self, stored: &str) -> Result<String, VaultError> {
        let Some((nonce_bytes, tag, ciphertext)) = split_envelope(stored) else {
            return Ok(stored.to_string());
        };

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| VaultError::Decrypt)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        // Reassemble ciphertext||tag for the aead API.
        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| VaultError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::NotUtf8)
    }
}

/// Whether a stored value has the encrypted-envelope shape.
pub fn is_encrypted(value: &str) -> bool {
    split_envelope(value).is_some()
}

/// Split a stored value into decoded (nonce, tag, ciphertext) segments.
/// Returns `None` when the value is not a three-segment envelope.
fn split_envelope(value: &str) -> Option<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let segments: Vec<&str> = value.split(':').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    // A colon-bearing legacy plaintext (e.g. a URL) rarely decodes as
    // base64; any undecodable or wrong-sized segment means plaintext.
    let nonce = BASE64.decode(segments[0]).ok()?;
    let tag = BASE64.decode(segments[1]).ok()?;
    let ciphertext = BASE64.decode(segments[2]).ok()?;
    if nonce.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return None;
    }
    Some((nonce, tag, ciphertext))
}

/// Maximum number of mask characters in a masked credential.
const MASK_CAP: usize = 20;

/// Mask a credential for display: first four and last four characters
/// retained, the middle replaced with `*` capped at twenty.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return value.to_string();
    }
    let stars = (chars.len() - 8).min(MASK_CAP);
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(stars))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        Vault::from_secret("test-signing-secret-test-signing-secret")
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let v = vault();
        let stored = v.encrypt("sk-or-v1-secret-key").expect("encrypt");
        assert_eq!(v.decrypt(&stored).expect("decrypt"), "sk-or-v1-secret-key");
    }

    #[test]
    fn envelope_has_three_segments() {
        let stored = vault().encrypt("value").expect("encrypt");
        assert_eq!(stored.split(':').count(), 3);
        assert!(is_encrypted(&stored));
    }

    #[test]
    fn encrypt_produces_different_envelopes_for_same_plaintext() {
        let v = vault();
        let a = v.encrypt("same").expect("encrypt");
        let b = v.encrypt("same").expect("encrypt");
        assert_ne!(a, b);
        assert_eq!(v.decrypt(&a).unwrap(), v.decrypt(&b).unwrap());
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let v = vault();
        assert_eq!(v.decrypt("plain-api-key").unwrap(), "plain-api-key");
        assert_eq!(v.decrypt("").unwrap(), "");
        // Colon-bearing but not base64 segments.
        assert_eq!(
            v.decrypt("https://example.com:8080/x").unwrap(),
            "https://example.com:8080/x"
        );
        // Right segment count, wrong segment sizes.
        assert_eq!(v.decrypt("YQ==:YQ==:YQ==").unwrap(), "YQ==:YQ==:YQ==");
    }

    #[test]
    fn wrong_key_fails_decrypt() {
        let stored = vault().encrypt("secret").expect("encrypt");
        let other = Vault::from_secret("a-different-secret-a-different-secret");
        assert!(matches!(other.decrypt(&stored), Err(VaultError::Decrypt)));
    }

    #[test]
    fn tampered_ciphertext_fails_decrypt() {
        let v = vault();
        let stored = v.encrypt("secret-value").expect("encrypt");
        let mut parts: Vec<String> = stored.split(':').map(String::from).collect();
        // Flip the ciphertext for a same-length, valid-base64 segment.
        let decoded = BASE64.decode(&parts[2]).unwrap();
        let flipped: Vec<u8> = decoded.iter().map(|b| b ^ 0xff).collect();
        parts[2] = BASE64.encode(flipped);
        let tampered = parts.join(":");
        assert!(matches!(v.decrypt(&tampered), Err(VaultError::Decrypt)));
    }

    #[test]
    fn explicit_key_and_derived_key_are_independent() {
        let raw = Vault::new([7u8; 32]);
        let stored = raw.encrypt("credential").expect("encrypt");
        assert_eq!(raw.decrypt(&stored).unwrap(), "credential");
        assert!(vault().decrypt(&stored).is_err());
    }

    #[test]
    fn derived_key_is_stable_across_instances() {
        let a = Vault::from_secret("stable-secret-stable-secret-stable");
        let b = Vault::from_secret("stable-secret-stable-secret-stable");
        let stored = a.encrypt("v").expect("encrypt");
        assert_eq!(b.decrypt(&stored).unwrap(), "v");
    }

    #[test]
    fn is_encrypted_rejects_plaintext_shapes() {
        assert!(!is_encrypted("plain"));
        assert!(!is_encrypted("a:b"));
        assert!(!is_encrypted("a:b:c:d"));
        assert!(!is_encrypted("::"));
        assert!(!is_encrypted("not!base64:YQ==:YQ=="));
    }

    #[test]
    fn mask_short_values_unchanged() {
        assert_eq!(mask(""), "");
        assert_eq!(mask("abc"), "abc");
        assert_eq!(mask("12345678"), "12345678");
    }

    #[test]
    fn mask_keeps_edges_and_stars_middle() {
        assert_eq!(mask("1234567890"), "1234**7890");
        let long = "a".repeat(100);
        let masked = mask(&long);
        assert_eq!(masked.len(), 8 + 20);
        assert!(masked[4..24].chars().all(|c| c == '*'));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_any_nonempty_string(plaintext in ".{1,200}") {
                let v = vault();
                let stored = v.encrypt(&plaintext).unwrap();
                prop_assert_eq!(v.decrypt(&stored).unwrap(), plaintext);
            }

            #[test]
            fn masked_form_preserves_edges(value in "[a-zA-Z0-9]{9,64}") {
                let masked = mask(&value);
                prop_assert_eq!(&masked[..4], &value[..4]);
                prop_assert_eq!(
                    &masked[masked.len() - 4..],
                    &value[value.len() - 4..]
                );
                let stars = masked.len() - 8;
                prop_assert!(stars <= 20);
                prop_assert!(masked[4..4 + stars].chars().all(|c| c == '*'));
            }

            #[test]
            fn non_envelope_input_is_identity(value in "[^:]{0,80}") {
                let v = vault();
                prop_assert_eq!(v.decrypt(&value).unwrap(), value);
            }
        }
    }
}
