//! Token issuance and interactive-secret verification.
//!
//! Three concerns live here, all free functions or small services over the
//! principal record (the record itself carries no behavior):
//!
//! - signed bearer tokens (HS256, 14-day default lifetime)
//! - password and PIN verifiers (bcrypt, work factor 12)
//! - the PIN attempt policy: five consecutive failures from one
//!   (IP, principal) pair block further attempts until a counter reset
//!
//! The attempt counter itself is persisted by the store; this crate only
//! decides what a given attempt means.

use chrono::{Duration, Utc};
use draftmill_types::PinAttempt;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// bcrypt work factor for password and PIN verifiers.
pub const HASH_COST: u32 = 12;

/// Consecutive failures from one (IP, principal) pair before blocking.
pub const PIN_MAX_ATTEMPTS: u32 = 5;

/// Errors from token and verifier operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token is invalid or expired")]
    InvalidToken,
    #[error("failed to sign token")]
    Signing,
    #[error("failed to hash secret")]
    Hashing,
}

/// JWT claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id.
    pub sub: Uuid,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
}

/// Issues and verifies signed bearer tokens.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl TokenSigner {
    /// Create a signer over the configured secret and token lifetime.
    pub fn new(secret: &str, lifetime: std::time::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime: Duration::seconds(lifetime.as_secs() as i64),
        }
    }

    /// Mint a token for a principal.
    pub fn issue(&self, principal_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal_id,
            exp: (now + self.lifetime).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| AuthError::Signing)
    }

    /// Verify a token and return its claims. Expired or tampered tokens
    /// are rejected uniformly.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}

/// Hash an interactive password.
pub fn hash_password(plain: &str) -> Result<String, AuthError> {
    bcrypt::hash(plain, HASH_COST).map_err(|_| AuthError::Hashing)
}

/// Verify an interactive password against its stored hash.
/// bcrypt's comparison is constant-time.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

/// Hash a second-factor PIN. Same parameters as passwords.
pub fn hash_pin(plain: &str) -> Result<String, AuthError> {
    bcrypt::hash(plain, HASH_COST).map_err(|_| AuthError::Hashing)
}

/// Verify a PIN against its stored hash.
pub fn verify_pin(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

/// Outcome of one PIN verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinVerdict {
    /// PIN matched; the caller must clear the attempt counter.
    Accepted,
    /// PIN did not match; the caller must bump the counter to the carried
    /// value (and set the blocked flag when it reached the threshold).
    Rejected {
        attempts: u32,
        attempts_remaining: u32,
        now_blocked: bool,
    },
    /// The pair is blocked; correctness of the PIN is not even consulted.
    Blocked,
}

/// Decide what a PIN attempt means given the persisted attempt record.
///
/// A blocked record wins over everything, including a correct PIN; only an
/// explicit counter reset (successful verification before the block, or an
/// administrative clear) unblocks the pair.
pub fn evaluate_pin_attempt(record: Option<&PinAttempt>, pin_matches: bool) -> PinVerdict {
    if record.is_some_and(|r| r.blocked) {
        return PinVerdict::Blocked;
    }
    if pin_matches {
        return PinVerdict::Accepted;
    }
    let attempts = record.map_or(0, |r| r.attempts) + 1;
    PinVerdict::Rejected {
        attempts,
        attempts_remaining: PIN_MAX_ATTEMPTS.saturating_sub(attempts),
        now_blocked: attempts >= PIN_MAX_ATTEMPTS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(
            "0123456789abcdef0123456789abcdef",
            std::time::Duration::from_secs(14 * 86400),
        )
    }

    fn attempt(attempts: u32, blocked: bool) -> PinAttempt {
        PinAttempt {
            ip: "203.0.113.9".to_string(),
            principal_id: Uuid::new_v4(),
            attempts,
            blocked,
            last_attempt: Utc::now(),
        }
    }

    #[test]
    fn issued_token_verifies() {
        let signer = signer();
        let id = Uuid::new_v4();
        let token = signer.issue(id).expect("issue");
        let claims = signer.verify(&token).expect("verify");
        assert_eq!(claims.sub, id);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let token = signer().issue(Uuid::new_v4()).expect("issue");
        let other = TokenSigner::new(
            "ffffffffffffffffffffffffffffffff",
            std::time::Duration::from_secs(60),
        );
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(signer().verify("not-a-token").is_err());
        assert!(signer().verify("").is_err());
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let hash = hash_password("correct horse").expect("hash");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not-a-bcrypt-hash"));
    }

    #[test]
    fn pin_hash_verifies() {
        let hash = hash_pin("4821").expect("hash");
        assert!(verify_pin("4821", &hash));
        assert!(!verify_pin("0000", &hash));
    }

    #[test]
    fn first_failure_counts_from_one() {
        let verdict = evaluate_pin_attempt(None, false);
        assert_eq!(
            verdict,
            PinVerdict::Rejected {
                attempts: 1,
                attempts_remaining: 4,
                now_blocked: false
            }
        );
    }

    #[test]
    fn fifth_failure_blocks() {
        let record = attempt(4, false);
        let verdict = evaluate_pin_attempt(Some(&record), false);
        assert_eq!(
            verdict,
            PinVerdict::Rejected {
                attempts: 5,
                attempts_remaining: 0,
                now_blocked: true
            }
        );
    }

    #[test]
    fn blocked_record_wins_over_correct_pin() {
        let record = attempt(5, true);
        assert_eq!(evaluate_pin_attempt(Some(&record), true), PinVerdict::Blocked);
        assert_eq!(evaluate_pin_attempt(Some(&record), false), PinVerdict::Blocked);
    }

    #[test]
    fn correct_pin_accepted_before_block() {
        let record = attempt(4, false);
        assert_eq!(evaluate_pin_attempt(Some(&record), true), PinVerdict::Accepted);
    }
}
