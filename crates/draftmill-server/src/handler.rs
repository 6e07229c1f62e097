//! The worker-side job handler: builds per-principal provider clients and
//! drives the stage runner.

use std::sync::Arc;

use async_trait::async_trait;
use draftmill_bus::EventBus;
use draftmill_config::Config;
use draftmill_encrypt::Vault;
use draftmill_metrics::Metrics;
use draftmill_pipeline::{RunOutcome, StageContext, StageRunner};
use draftmill_providers::{
    ChatModel, FirecrawlClient, OpenRouterClient, SearchScrape, SupabaseClient,
    VectorSearch,
};
use draftmill_queue::JobHandler;
use draftmill_store::{PgStore, PrincipalStore};
use draftmill_types::{CredentialKind, JobTicket, Principal};
use tracing::info;

pub struct PipelineHandler {
    store: Arc<PgStore>,
    bus: Arc<dyn EventBus>,
    config: Arc<Config>,
    vault: Vault,
    metrics: Arc<Metrics>,
    max_attempts: u32,
}

impl PipelineHandler {
    pub fn new(
        store: Arc<PgStore>,
        bus: Arc<dyn EventBus>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
        max_attempts: u32,
    ) -> Self {
        let vault = match config.encryption_key() {
            Some(key) => Vault::new(key),
            None => Vault::from_secret(&config.jwt_secret),
        };
        Self {
            store,
            bus,
            config,
            vault,
            metrics,
            max_attempts,
        }
    }

    /// Decrypt one credential slot; unset or undecryptable slots read as
    /// absent and the stage that needs them fails with a configuration
    /// error naming the credential.
    fn credential(&self, principal: &Principal, kind: CredentialKind) -> Option<String> {
        let slot = principal.credentials.get(kind);
        let ciphertext = slot.ciphertext.as_deref().filter(|c| !c.is_empty())?;
        self.vault
            .decrypt(ciphertext)
            .ok()
            .filter(|plain| !plain.is_empty())
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn run(
        &self,
        ticket: &JobTicket,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let principal = self.store.principal_by_id(ticket.owner_id).await?;

        let chat_key = self.credential(&principal, CredentialKind::Openrouter);
        let search: Option<Arc<dyn SearchScrape>> = self
            .credential(&principal, CredentialKind::Firecrawl)
            .map(|key| {
                Arc::new(FirecrawlClient::new(&self.config.firecrawl_base_url, key))
                    as Arc<dyn SearchScrape>
            });
        let chat: Option<Arc<dyn ChatModel>> = chat_key.clone().map(|key| {
            Arc::new(OpenRouterClient::new(
                &self.config.openrouter_base_url,
                key,
                &self.config.llm_model,
            )) as Arc<dyn ChatModel>
        });
        let vector: Option<Arc<dyn VectorSearch>> = self
            .credential(&principal, CredentialKind::Supabase)
            .map(|key| {
                Arc::new(SupabaseClient::new(
                    &self.config.supabase_base_url,
                    key,
                    &self.config.openrouter_base_url,
                    chat_key.clone().unwrap_or_default(),
                )) as Arc<dyn VectorSearch>
            });

        let ctx = StageContext {
            store: self.store.clone(),
            bus: self.bus.clone(),
            search,
            chat: chat.clone(),
            vector,
        };
        let runner = StageRunner::new(ctx);
        let result = runner.run(ticket.job_id, ticket.continue_from).await;

        if let Some(chat) = chat {
            let usage = chat.token_usage(true);
            self.metrics
                .record_tokens(usage.prompt_tokens, usage.completion_tokens);
        }

        match result {
            Ok(RunOutcome::Completed) => {
                self.metrics.jobs_completed.inc();
                info!(job_id = %ticket.job_id, "job completed");
                Ok(())
            }
            Ok(RunOutcome::Paused(status)) => {
                info!(job_id = %ticket.job_id, %status, "job paused");
                Ok(())
            }
            Err(e) => {
                if ticket.attempt >= self.max_attempts {
                    self.metrics.jobs_failed.inc();
                }
                Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
            }
        }
    }
}
