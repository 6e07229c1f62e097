//! Search & scrape client.
//!
//! One provider covers both web search and page scraping. The high-level
//! [`fetch_serp`] drives a search for up to ten results, scrapes each in
//! order with a pacing delay, and normalizes every outcome (successful or
//! failed) into a [`SerpEntry`].

use std::time::Duration;

use async_trait::async_trait;
use draftmill_types::{MAX_SERP_ENTRIES, SerpEntry};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::html;
use crate::{ProviderError, check_status};

/// Per-call timeout for search and scrape requests.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Pacing delay between consecutive scrapes.
pub const SCRAPE_DELAY: Duration = Duration::from_millis(500);

const PROVIDER: &str = "firecrawl";

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// One scraped page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeResult {
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// The search/scrape seam the pipeline depends on.
#[async_trait]
pub trait SearchScrape: Send + Sync {
    async fn search(
        &self,
        query: &str,
        region: &str,
        language: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ProviderError>;

    /// Scrape one URL. Failure is an error string, never a propagated
    /// provider error; a failed scrape still produces a SERP entry.
    async fn scrape(&self, url: &str) -> Result<ScrapeResult, String>;
}

/// HTTP client for the firecrawl-shaped API.
pub struct FirecrawlClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FirecrawlClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Cheap liveness probe used by the credential test endpoint: a
    /// one-result search for a fixed term.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.search("example", "us", "en", 1).await.map(|_| ())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    data: ScrapeResult,
}

#[async_trait]
impl SearchScrape for FirecrawlClient {
    async fn search(
        &self,
        query: &str,
        region: &str,
        language: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "query": query,
                "limit": limit,
                "lang": language,
                "country": region,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;
        Ok(body.data)
    }

    async fn scrape(&self, url: &str) -> Result<ScrapeResult, String> {
        let response = self
            .client
            .post(format!("{}/v1/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "url": url,
                "formats": ["markdown", "html"],
            }))
            .send()
            .await
            .map_err(|e| format!("scrape request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("scrape returned HTTP {status}"));
        }
        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| format!("scrape response was malformed: {e}"))?;
        Ok(body.data)
    }
}

/// Search, then scrape each hit in order, producing a normalized entry per
/// hit. `on_entry` fires after each entry completes (persist-as-you-go).
pub async fn fetch_serp<S, F, Fut>(
    client: &S,
    query: &str,
    region: &str,
    language: &str,
    mut on_entry: F,
) -> Result<Vec<SerpEntry>, ProviderError>
where
    S: SearchScrape + ?Sized,
    F: FnMut(SerpEntry, usize) -> Fut,
    Fut: Future<Output = ()>,
{
    let hits = client
        .search(query, region, language, MAX_SERP_ENTRIES)
        .await?;

    let mut entries = Vec::new();
    for (index, hit) in hits.into_iter().take(MAX_SERP_ENTRIES).enumerate() {
        if index > 0 {
            tokio::time::sleep(SCRAPE_DELAY).await;
        }
        let entry = match client.scrape(&hit.url).await {
            Ok(result) => entry_from_scrape(&hit, index, &result),
            Err(error) => {
                debug!(url = %hit.url, %error, "scrape failed");
                SerpEntry {
                    url: hit.url,
                    title: hit.title,
                    position: index as u32 + 1,
                    headings: Vec::new(),
                    content: String::new(),
                    word_count: 0,
                    error: Some(error),
                }
            }
        };
        on_entry(entry.clone(), index).await;
        entries.push(entry);
    }
    Ok(entries)
}

fn entry_from_scrape(hit: &SearchHit, index: usize, result: &ScrapeResult) -> SerpEntry {
    let page = match (&result.html, &result.markdown) {
        (Some(html), _) => html::extract(html),
        (None, Some(markdown)) => page_from_markdown(markdown),
        (None, None) => html::ExtractedPage::default(),
    };
    SerpEntry {
        url: hit.url.clone(),
        title: hit.title.clone(),
        position: index as u32 + 1,
        headings: page.headings,
        content: page.text,
        word_count: page.word_count,
        error: None,
    }
}

/// Fallback extraction when the provider returned markdown only.
fn page_from_markdown(markdown: &str) -> html::ExtractedPage {
    let mut headings = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&level) {
            let text = trimmed[level..].trim();
            if !text.is_empty() {
                headings.push(format!("h{level}: {text}"));
            }
        }
    }
    let text = markdown.split_whitespace().collect::<Vec<_>>().join(" ");
    let word_count = text.split_whitespace().count() as u32;
    html::ExtractedPage {
        headings,
        text,
        word_count,
    }
}
