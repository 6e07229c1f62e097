//! Configuration for draftmill processes.
//!
//! Both roles (API and worker) read the same environment-variable set at
//! startup. Values are validated once, up front; a process with a bad
//! configuration refuses to boot rather than failing mid-job.
//!
//! # Example
//!
//! ```
//! use draftmill_config::Config;
//!
//! let mut config = Config::default();
//! config.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
//! config.validate().expect("valid config");
//! assert_eq!(config.listen_port, 3000);
//! ```

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Minimum accepted JWT secret length in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Default token lifetime: 14 days.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 14 * 24 * 60 * 60;

/// Complete process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen port for the API role.
    pub listen_port: u16,
    /// Postgres connection string.
    pub database_url: String,
    /// Redis connection URL (`redis://host:port`).
    pub redis_url: String,
    /// Optional Redis password, appended to the connection as auth.
    pub redis_password: Option<String>,
    /// Token-signing secret. Must be at least 32 characters.
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub token_lifetime_secs: u64,
    /// Optional raw 32-byte credential encryption key, hex-encoded.
    /// When absent, the key is derived from `jwt_secret`.
    pub encryption_key_hex: Option<String>,
    /// Cluster-wide cap on concurrently running jobs.
    pub max_concurrent_jobs: u32,
    /// Per-worker-process cap on concurrently running jobs.
    pub worker_concurrency: u32,
    /// Honor `x-forwarded-for` from a single trusted hop.
    pub trusted_proxy: bool,
    /// LLM model identifier sent on every chat call.
    pub llm_model: String,
    /// Base URL of the search/scrape provider.
    pub firecrawl_base_url: String,
    /// Base URL of the LLM chat provider.
    pub openrouter_base_url: String,
    /// Base URL of the vector-similarity provider.
    pub supabase_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 3000,
            database_url: "postgres://localhost:5432/draftmill".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_password: None,
            jwt_secret: String::new(),
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            encryption_key_hex: None,
            max_concurrent_jobs: 5,
            worker_concurrency: 2,
            trusted_proxy: false,
            llm_model: "openai/gpt-5.2".to_string(),
            firecrawl_base_url: "https://api.firecrawl.dev".to_string(),
            openrouter_base_url: "https://openrouter.ai/api".to_string(),
            supabase_base_url: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from process environment variables.
    ///
    /// Every field has a `DRAFTMILL_`-prefixed variable; unset variables
    /// keep their defaults. The result is validated before being returned.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(port) = read_env("DRAFTMILL_PORT") {
            config.listen_port = port
                .parse()
                .with_context(|| format!("DRAFTMILL_PORT is not a port number: {port}"))?;
        }
        if let Some(url) = read_env("DRAFTMILL_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(url) = read_env("DRAFTMILL_REDIS_URL") {
            config.redis_url = url;
        }
        config.redis_password = read_env("DRAFTMILL_REDIS_PASSWORD");
        if let Some(secret) = read_env("DRAFTMILL_JWT_SECRET") {
            config.jwt_secret = secret;
        }
        if let Some(secs) = read_env("DRAFTMILL_TOKEN_LIFETIME_SECS") {
            config.token_lifetime_secs = secs
                .parse()
                .with_context(|| "DRAFTMILL_TOKEN_LIFETIME_SECS is not a number")?;
        }
        config.encryption_key_hex = read_env("DRAFTMILL_ENCRYPTION_KEY");
        if let Some(n) = read_env("DRAFTMILL_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = n
                .parse()
                .with_context(|| "DRAFTMILL_MAX_CONCURRENT_JOBS is not a number")?;
        }
        if let Some(n) = read_env("DRAFTMILL_WORKER_CONCURRENCY") {
            config.worker_concurrency = n
                .parse()
                .with_context(|| "DRAFTMILL_WORKER_CONCURRENCY is not a number")?;
        }
        if let Some(flag) = read_env("DRAFTMILL_TRUSTED_PROXY") {
            config.trusted_proxy = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(model) = read_env("DRAFTMILL_LLM_MODEL") {
            config.llm_model = model;
        }
        if let Some(url) = read_env("DRAFTMILL_FIRECRAWL_BASE_URL") {
            config.firecrawl_base_url = url;
        }
        if let Some(url) = read_env("DRAFTMILL_OPENROUTER_BASE_URL") {
            config.openrouter_base_url = url;
        }
        if let Some(url) = read_env("DRAFTMILL_SUPABASE_BASE_URL") {
            config.supabase_base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints that cannot be expressed in the types.
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            bail!(
                "jwt secret must be at least {MIN_JWT_SECRET_LEN} characters (got {})",
                self.jwt_secret.len()
            );
        }
        if let Some(key) = &self.encryption_key_hex {
            let bytes = hex::decode(key).context("encryption key is not valid hex")?;
            if bytes.len() != 32 {
                bail!(
                    "encryption key must decode to exactly 32 bytes (got {})",
                    bytes.len()
                );
            }
        }
        if self.max_concurrent_jobs == 0 {
            bail!("max_concurrent_jobs must be at least 1");
        }
        if self.worker_concurrency == 0 {
            bail!("worker_concurrency must be at least 1");
        }
        Ok(())
    }

    /// Token lifetime as a [`Duration`].
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    /// The decoded raw encryption key, if one is configured.
    pub fn encryption_key(&self) -> Option<[u8; 32]> {
        let hex_key = self.encryption_key_hex.as_deref()?;
        let bytes = hex::decode(hex_key).ok()?;
        bytes.try_into().ok()
    }

    /// Redis connection URL with the password folded in when configured.
    pub fn redis_connection_url(&self) -> String {
        match &self.redis_password {
            Some(password) if !password.is_empty() => {
                // redis://:password@host:port
                match self.redis_url.strip_prefix("redis://") {
                    Some(rest) => format!("redis://:{password}@{rest}"),
                    None => self.redis_url.clone(),
                }
            }
            _ => self.redis_url.clone(),
        }
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            jwt_secret: "a".repeat(32),
            ..Config::default()
        }
    }

    #[test]
    fn default_ports_and_limits() {
        let config = Config::default();
        assert_eq!(config.listen_port, 3000);
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.token_lifetime(), Duration::from_secs(14 * 86400));
        assert!(!config.trusted_proxy);
    }

    #[test]
    fn validate_rejects_short_jwt_secret() {
        let config = Config {
            jwt_secret: "short".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_32_char_secret() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_encryption_key() {
        let mut config = valid_config();
        config.encryption_key_hex = Some("not-hex".to_string());
        assert!(config.validate().is_err());

        config.encryption_key_hex = Some("abcd".to_string()); // 2 bytes
        assert!(config.validate().is_err());
    }

    #[test]
    fn encryption_key_decodes_32_bytes() {
        let mut config = valid_config();
        config.encryption_key_hex = Some("11".repeat(32));
        assert!(config.validate().is_ok());
        let key = config.encryption_key().expect("key");
        assert_eq!(key, [0x11u8; 32]);
    }

    #[test]
    fn missing_encryption_key_is_none() {
        assert!(valid_config().encryption_key().is_none());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = valid_config();
        config.worker_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn redis_url_folds_in_password() {
        let mut config = valid_config();
        config.redis_url = "redis://cache:6379".to_string();
        config.redis_password = Some("hunter2".to_string());
        assert_eq!(
            config.redis_connection_url(),
            "redis://:hunter2@cache:6379"
        );
    }

    #[test]
    fn redis_url_unchanged_without_password() {
        let mut config = valid_config();
        config.redis_url = "redis://cache:6379".to_string();
        assert_eq!(config.redis_connection_url(), "redis://cache:6379");
    }
}
