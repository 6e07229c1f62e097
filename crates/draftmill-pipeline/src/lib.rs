//! The stage runner: drives one job through the seven-stage pipeline.
//!
//! The runner owns nothing durable. The store is the source of truth; the
//! runner persists every transition before it matters and emits the
//! corresponding bus event, so a worker crash at any await point leaves a
//! consistent, resumable record.
//!
//! Stage boundaries double as pause points: unless the job runs in
//! continuous mode, the runner persists a `paused_after_*` status after
//! each of stages 1–5 and 7 and returns the worker slot. A later
//! `continue` request enqueues the job again with the pause state; the
//! skip table in [`runner`] resumes from the right stage.

mod runner;

use std::sync::Arc;

use draftmill_bus::EventBus;
use draftmill_providers::{ChatModel, ProviderError, SearchScrape, VectorSearch};
use draftmill_store::{JobStore, StoreError};
use draftmill_types::CredentialKind;

pub use runner::{RunOutcome, StageRunner};

/// Pacing delay between per-question vector searches in stage 4.
pub const QUESTION_DELAY: std::time::Duration = std::time::Duration::from_millis(300);

/// Pacing delay between block writes in stage 5.
pub const BLOCK_WRITE_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

/// Errors that abort a stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The principal has not configured a credential this stage needs.
    #[error("{0} credential is not configured")]
    MissingCredential(CredentialKind),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything one job invocation needs: the durable seams plus the
/// per-principal provider clients (absent when the credential is not set).
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn JobStore>,
    pub bus: Arc<dyn EventBus>,
    pub search: Option<Arc<dyn SearchScrape>>,
    pub chat: Option<Arc<dyn ChatModel>>,
    pub vector: Option<Arc<dyn VectorSearch>>,
}

impl StageContext {
    pub(crate) fn search(&self) -> Result<&Arc<dyn SearchScrape>, PipelineError> {
        self.search
            .as_ref()
            .ok_or(PipelineError::MissingCredential(CredentialKind::Firecrawl))
    }

    pub(crate) fn chat(&self) -> Result<&Arc<dyn ChatModel>, PipelineError> {
        self.chat
            .as_ref()
            .ok_or(PipelineError::MissingCredential(CredentialKind::Openrouter))
    }

    pub(crate) fn vector(&self) -> Result<&Arc<dyn VectorSearch>, PipelineError> {
        self.vector
            .as_ref()
            .ok_or(PipelineError::MissingCredential(CredentialKind::Supabase))
    }
}
