//! Vector-similarity client.
//!
//! Embeds question text via the chat provider's embedding endpoint and
//! matches against the principal's document store (supabase-shaped RPC).
//! [`find_answer`] is the high-level operation stage 4 consumes.

use std::time::Duration;

use async_trait::async_trait;
use draftmill_types::AnsweredQuestion;
use serde::Deserialize;

use crate::{ProviderError, check_status};

/// Per-call timeout for vector matches.
pub const VECTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Similarity floor for accepted answers.
pub const MIN_SIMILARITY: f32 = 0.55;

/// Top-k for answer retrieval.
pub const MATCH_K: usize = 5;

/// Maximum answer length kept on a block.
pub const MAX_ANSWER_CHARS: usize = 1_000;

const PROVIDER: &str = "supabase";

/// One matched document.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentMatch {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub similarity: f32,
}

/// The vector-search seam the pipeline depends on.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Single-text embedding.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Nearest documents with similarity at or above `min_similarity`.
    async fn match_documents(
        &self,
        embedding: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<DocumentMatch>, ProviderError>;
}

/// HTTP client for the supabase-shaped vector RPC, with embeddings served
/// by the chat provider's embedding endpoint.
pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    embed_base_url: String,
    embed_api_key: String,
    embed_model: String,
}

impl SupabaseClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        embed_base_url: impl Into<String>,
        embed_api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(VECTOR_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            embed_base_url: embed_base_url.into(),
            embed_api_key: embed_api_key.into(),
            embed_model: "text-embedding-3-small".to_string(),
        }
    }

    /// Cheap key check used by the credential test endpoint: a zero-vector
    /// match with k = 1.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.match_documents(&[0.0; 8], 1, 1.0).await.map(|_| ())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingBody>,
}

#[derive(Deserialize)]
struct EmbeddingBody {
    embedding: Vec<f32>,
}

#[async_trait]
impl VectorSearch for SupabaseClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.embed_base_url))
            .bearer_auth(&self.embed_api_key)
            .json(&serde_json::json!({
                "model": self.embed_model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "no embedding returned"))
    }

    async fn match_documents(
        &self,
        embedding: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<DocumentMatch>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/rest/v1/rpc/match_documents", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "query_embedding": embedding,
                "match_count": k,
                "match_threshold": min_similarity,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;
        let matches: Vec<DocumentMatch> = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;
        // The RPC should respect the floor; filter again to be certain.
        Ok(matches
            .into_iter()
            .filter(|m| m.similarity >= min_similarity)
            .collect())
    }
}

/// Search the document store for an answer to a research question.
///
/// The question is reduced to content-bearing tokens before embedding;
/// when the reduction leaves too little, the raw question is embedded
/// instead. The best hit at or above the similarity floor becomes the
/// answer, truncated to a thousand characters.
pub async fn find_answer<V>(
    vector: &V,
    question: &str,
) -> Result<Option<AnsweredQuestion>, ProviderError>
where
    V: VectorSearch + ?Sized,
{
    let reduced = reduce_query(question);
    let query = if reduced.len() < 6 { question } else { &reduced };

    let embedding = vector.embed(query).await?;
    let mut matches = vector
        .match_documents(&embedding, MATCH_K, MIN_SIMILARITY)
        .await?;
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let Some(best) = matches.into_iter().next() else {
        return Ok(None);
    };

    let mut answer = best.content;
    if answer.chars().count() > MAX_ANSWER_CHARS {
        answer = answer.chars().take(MAX_ANSWER_CHARS).collect();
        answer.push('…');
    }

    let source = best
        .metadata
        .get("url")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(Some(AnsweredQuestion {
        question: question.to_string(),
        answer,
        source,
        similarity: best.similarity,
    }))
}

/// Lowercase, strip punctuation, drop stop words, keep tokens longer than
/// two characters.
fn reduce_query(question: &str) -> String {
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 2 && !STOP_WORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// English, Russian, and German stop words dropped from query text.
const STOP_WORDS: &[&str] = &[
    // English
    "the", "and", "for", "are", "was", "were", "what", "when", "where", "which",
    "who", "why", "how", "does", "did", "can", "could", "should", "would", "will",
    "this", "that", "these", "those", "with", "from", "into", "about", "your",
    "their", "there", "have", "has", "had", "been", "being", "but", "not", "you",
    "all", "any", "its", "our", "out", "than", "then", "them", "they",
    // Russian
    "это", "что", "как", "для", "или", "его", "она", "они", "оно", "мы", "вы",
    "так", "только", "еще", "уже", "при", "без", "над", "под", "все",
    "чем", "том", "тот", "эта", "эти", "где", "когда", "почему", "какой",
    // German
    "der", "die", "das", "und", "oder", "aber", "ist", "sind", "war", "waren",
    "ein", "eine", "einen", "einem", "mit", "von", "für", "auf", "aus", "bei",
    "nach", "über", "unter", "wie", "was", "wer", "wann", "warum", "welche",
    "nicht", "auch", "noch", "sich", "dass", "werden", "wurde", "kann",
];

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        matches: Vec<DocumentMatch>,
        embedded: std::sync::Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(matches: Vec<DocumentMatch>) -> Self {
            Self {
                matches,
                embedded: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorSearch for Scripted {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.embedded.lock().unwrap().push(text.to_string());
            Ok(vec![0.1, 0.2, 0.3])
        }

        async fn match_documents(
            &self,
            _embedding: &[f32],
            k: usize,
            min_similarity: f32,
        ) -> Result<Vec<DocumentMatch>, ProviderError> {
            Ok(self
                .matches
                .iter()
                .filter(|m| m.similarity >= min_similarity)
                .take(k)
                .cloned()
                .collect())
        }
    }

    fn doc(content: &str, url: &str, similarity: f32) -> DocumentMatch {
        DocumentMatch {
            content: content.to_string(),
            metadata: serde_json::json!({"url": url}),
            similarity,
        }
    }

    #[test]
    fn query_reduction_drops_stop_words_and_short_tokens() {
        let reduced = reduce_query("What are the best filters for a drip machine?");
        assert_eq!(reduced, "best filters drip machine");
    }

    #[test]
    fn query_reduction_handles_russian_and_german() {
        assert_eq!(reduce_query("Что такое кофемашина?"), "такое кофемашина");
        assert_eq!(
            reduce_query("Welche Maschine ist die beste?"),
            "maschine beste"
        );
    }

    #[tokio::test]
    async fn short_reduction_falls_back_to_raw_question() {
        let vector = Scripted::new(vec![doc("answer", "https://s.example", 0.9)]);
        find_answer(&vector, "Why?").await.expect("find");
        let embedded = vector.embedded.lock().unwrap();
        assert_eq!(embedded[0], "Why?");
    }

    #[tokio::test]
    async fn best_match_becomes_the_answer() {
        let vector = Scripted::new(vec![
            doc("weaker answer", "https://weak.example", 0.6),
            doc("strong answer", "https://strong.example", 0.9),
        ]);
        let answer = find_answer(&vector, "What is the best grind size for espresso?")
            .await
            .expect("find")
            .expect("answer");
        assert_eq!(answer.answer, "strong answer");
        assert_eq!(answer.source, "https://strong.example");
        assert!((answer.similarity - 0.9).abs() < f32::EPSILON);
        assert_eq!(answer.question, "What is the best grind size for espresso?");
    }

    #[tokio::test]
    async fn below_floor_matches_yield_none() {
        let vector = Scripted::new(vec![doc("too weak", "https://w.example", 0.4)]);
        let answer = find_answer(&vector, "What is the best grind size?")
            .await
            .expect("find");
        assert!(answer.is_none());
    }

    #[tokio::test]
    async fn long_answers_are_truncated_with_ellipsis() {
        let long = "x".repeat(1500);
        let vector = Scripted::new(vec![doc(&long, "https://s.example", 0.8)]);
        let answer = find_answer(&vector, "What about very long answers here?")
            .await
            .expect("find")
            .expect("answer");
        assert_eq!(answer.answer.chars().count(), MAX_ANSWER_CHARS + 1);
        assert!(answer.answer.ends_with('…'));
    }

    #[tokio::test]
    async fn missing_metadata_url_yields_empty_source() {
        let vector = Scripted::new(vec![DocumentMatch {
            content: "answer".to_string(),
            metadata: serde_json::json!({}),
            similarity: 0.7,
        }]);
        let answer = find_answer(&vector, "Where does this answer come from?")
            .await
            .expect("find")
            .expect("answer");
        assert_eq!(answer.source, "");
    }
}
