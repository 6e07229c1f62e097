//! Backoff strategies for the job queue.
//!
//! The queue redelivers failed jobs with a configurable delay between
//! attempts. The default policy matches the queue contract: three total
//! attempts, exponential backoff starting at five seconds.
//!
//! # Example
//!
//! ```
//! use draftmill_retry::{BackoffConfig, delay_for_attempt};
//! use std::time::Duration;
//!
//! let config = BackoffConfig::default();
//! assert_eq!(config.max_attempts, 3);
//! let delay = delay_for_attempt(&config, 1);
//! assert!(delay >= Duration::from_millis(2500));
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy for spacing redelivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Delay doubles each attempt (default).
    #[default]
    Exponential,
    /// Delay grows linearly each attempt.
    Linear,
    /// Same delay every attempt.
    Constant,
}

/// Configuration for a backoff schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Strategy used to calculate the delay.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Total attempts, first delivery included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for the first redelivery.
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    /// Cap on any single delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.0 = none, 0.5 = ±50%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Calculate the delay before redelivering after a given failed attempt.
///
/// `attempt` is 1-indexed: the first failed delivery waits `base_delay`
/// (under the exponential strategy), the next one twice that, and so on.
/// The schedule is capped at `max_delay`, then jittered.
pub fn delay_for_attempt(config: &BackoffConfig, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let base_ms = config.base_delay.as_millis();

    // Growth multiplier for this attempt. The shift is bounded so the
    // u128 product cannot overflow before the cap is applied.
    let growth: u128 = match config.strategy {
        BackoffStrategy::Exponential => 1u128 << (attempt - 1).min(32) as u128,
        BackoffStrategy::Linear => attempt as u128,
        BackoffStrategy::Constant => 1,
    };

    let capped_ms = (base_ms * growth).min(config.max_delay.as_millis()) as u64;
    if config.jitter <= 0.0 {
        return Duration::from_millis(capped_ms);
    }
    Duration::from_millis(jittered(capped_ms, config.jitter))
}

/// Pick a uniform point in `millis ± millis * factor`. A factor of 0.5
/// spreads a 10 s delay across 5 s..15 s.
fn jittered(millis: u64, factor: f64) -> u64 {
    use rand::RngExt;

    let spread = millis as f64 * factor.clamp(0.0, 1.0);
    let floor = millis as f64 - spread;
    let sample: f64 = rand::rng().random();
    (floor + sample * spread * 2.0).round() as u64
}

/// Run an async fallible operation under a backoff schedule.
///
/// The operation receives the 1-based attempt number. Delays are awaited
/// on the tokio timer so a waiting retry never pins a worker thread.
pub async fn run_with_backoff<T, E, F, Fut>(
    config: &BackoffConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= config.max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(delay_for_attempt(config, attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(strategy: BackoffStrategy) -> BackoffConfig {
        BackoffConfig {
            strategy,
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }

    #[test]
    fn queue_defaults_match_contract() {
        let config = BackoffConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(5));
        assert_eq!(config.strategy, BackoffStrategy::Exponential);
    }

    #[test]
    fn exponential_doubles_per_attempt() {
        let config = no_jitter(BackoffStrategy::Exponential);
        assert_eq!(delay_for_attempt(&config, 1), Duration::from_secs(5));
        assert_eq!(delay_for_attempt(&config, 2), Duration::from_secs(10));
        assert_eq!(delay_for_attempt(&config, 3), Duration::from_secs(20));
    }

    #[test]
    fn linear_grows_per_attempt() {
        let config = no_jitter(BackoffStrategy::Linear);
        assert_eq!(delay_for_attempt(&config, 1), Duration::from_secs(5));
        assert_eq!(delay_for_attempt(&config, 3), Duration::from_secs(15));
    }

    #[test]
    fn constant_never_grows() {
        let config = no_jitter(BackoffStrategy::Constant);
        assert_eq!(delay_for_attempt(&config, 1), Duration::from_secs(5));
        assert_eq!(delay_for_attempt(&config, 9), Duration::from_secs(5));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let config = no_jitter(BackoffStrategy::Exponential);
        assert_eq!(delay_for_attempt(&config, 10), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_in_band() {
        let config = BackoffConfig {
            jitter: 0.5,
            ..no_jitter(BackoffStrategy::Constant)
        };
        for _ in 0..100 {
            let delay = delay_for_attempt(&config, 1);
            assert!(delay >= Duration::from_millis(2500));
            assert!(delay <= Duration::from_millis(7500));
        }
    }

    #[tokio::test]
    async fn run_with_backoff_succeeds_after_retries() {
        let config = BackoffConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter: 0.0,
            ..BackoffConfig::default()
        };
        let mut seen = 0;
        let result = run_with_backoff(&config, |attempt| {
            seen = attempt;
            async move {
                if attempt < 3 {
                    Err("transient")
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn run_with_backoff_gives_up_after_max_attempts() {
        let config = BackoffConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter: 0.0,
            ..BackoffConfig::default()
        };
        let result: Result<(), _> =
            run_with_backoff(&config, |_| async { Err::<(), _>("permanent") }).await;
        assert_eq!(result, Err("permanent"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_never_exceeds_jittered_cap(attempt in 1u32..64) {
                let config = BackoffConfig {
                    jitter: 0.5,
                    ..BackoffConfig::default()
                };
                let delay = delay_for_attempt(&config, attempt);
                // cap * (1 + jitter)
                prop_assert!(delay <= Duration::from_millis(180_000));
            }

            #[test]
            fn exponential_is_monotonic_without_jitter(attempt in 1u32..16) {
                let config = BackoffConfig {
                    jitter: 0.0,
                    ..BackoffConfig::default()
                };
                let a = delay_for_attempt(&config, attempt);
                let b = delay_for_attempt(&config, attempt + 1);
                prop_assert!(b >= a);
            }
        }
    }
}
