//! Typed clients for the three external providers.
//!
//! Each client is a thin wrapper over one HTTP API, constructed per job
//! invocation from the principal's decrypted credential; there is no
//! global client state. The pipeline talks to the trait seams
//! ([`SearchScrape`], [`ChatModel`], [`VectorSearch`]) so scenario tests
//! substitute scripted implementations without any HTTP.
//!
//! LLM output normalization (heading stripping, link force-append, JSON
//! fence removal) lives in [`ops`], never inside the HTTP wrappers.

pub mod html;
pub mod llm;
pub mod ops;
pub mod search;
pub mod vector;

pub use llm::{ChatMessage, ChatModel, ChatRole, OpenRouterClient, TokenUsage};
pub use search::{FirecrawlClient, ScrapeResult, SearchHit, SearchScrape, fetch_serp};
pub use vector::{DocumentMatch, SupabaseClient, VectorSearch, find_answer};

/// Errors from provider calls.
///
/// Scrape failures do not surface here: a failed scrape becomes an error
/// string on the produced SERP entry, per the search-client contract.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} returned HTTP {status}: {detail}")]
    Http {
        provider: &'static str,
        status: u16,
        detail: String,
    },
    #[error("{provider} request failed: {detail}")]
    Transport {
        provider: &'static str,
        detail: String,
    },
    #[error("{provider} returned a malformed response: {detail}")]
    Malformed {
        provider: &'static str,
        detail: String,
    },
}

impl ProviderError {
    pub(crate) fn transport(provider: &'static str, e: reqwest::Error) -> Self {
        ProviderError::Transport {
            provider,
            detail: e.to_string(),
        }
    }

    pub(crate) fn malformed(provider: &'static str, detail: impl Into<String>) -> Self {
        ProviderError::Malformed {
            provider,
            detail: detail.into(),
        }
    }
}

/// Map a non-success response into [`ProviderError::Http`], draining the
/// body for the error detail.
pub(crate) async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        provider,
        status: status.as_u16(),
        detail,
    })
}
