//! Durable store adapter.
//!
//! The store is the sole source of truth for jobs, principals, and
//! projects. Every mutation here is atomic at statement granularity;
//! appending to a job's log and updating its status are deliberately
//! independent writes, so a crash between them leaves readers with stale
//! progress, never a malformed log.
//!
//! Three trait seams ([`JobStore`], [`PrincipalStore`], [`ProjectStore`])
//! plus the queue's persistence seam ([`QueueStore`]). [`PgStore`] backs
//! them with Postgres; [`MemStore`] is the in-memory implementation used
//! by tests and single-process development runs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draftmill_types::{
    Block, CredentialKind, CredentialSlot, Job, JobLogEntry, JobStatus, JobTicket,
    PinAttempt, Principal, Project, QueueStats, StructureAnalysis,
};
use uuid::Uuid;

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing id, or an id owned by another principal (indistinguishable).
    #[error("record not found")]
    NotFound,
    /// Unique-key conflict (e.g. duplicate principal email).
    #[error("duplicate key: {0}")]
    Duplicate(String),
    /// A stored document failed to decode.
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Page of results from a filtered listing.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
}

/// CRUD and atomic field updates for the job record.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> StoreResult<()>;

    async fn fetch_job(&self, id: Uuid) -> StoreResult<Job>;

    /// Fetch with an ownership check; a foreign job reads as missing.
    async fn fetch_job_for_owner(&self, id: Uuid, owner: Uuid) -> StoreResult<Job>;

    async fn list_jobs_in_project(&self, project: Uuid, owner: Uuid)
    -> StoreResult<Vec<Job>>;

    async fn list_jobs_for_owner(
        &self,
        owner: Uuid,
        status: Option<JobStatus>,
        offset: u64,
        limit: u64,
    ) -> StoreResult<JobPage>;

    async fn delete_job(&self, id: Uuid, owner: Uuid) -> StoreResult<()>;

    /// Atomic append to the job log. Never rewrites existing entries.
    async fn append_log(&self, id: Uuid, entry: &JobLogEntry) -> StoreResult<()>;

    /// Atomic status/progress/step update, independent of the log.
    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        current_step: Option<&str>,
    ) -> StoreResult<()>;

    async fn set_started(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
    async fn set_completed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
    async fn set_error(&self, id: Uuid, error: &str) -> StoreResult<()>;

    /// Atomic append of one SERP entry as it arrives.
    async fn push_serp_entry(&self, id: Uuid, entry: &draftmill_types::SerpEntry)
    -> StoreResult<()>;

    async fn set_structure_analysis(
        &self,
        id: Uuid,
        analysis: &StructureAnalysis,
    ) -> StoreResult<()>;

    async fn set_blocks(&self, id: Uuid, blocks: &[Block]) -> StoreResult<()>;
    async fn set_article(&self, id: Uuid, article: &str) -> StoreResult<()>;
    async fn set_seo(&self, id: Uuid, title: &str, description: &str) -> StoreResult<()>;

    /// Log entries at or after `since`, oldest first.
    async fn logs_since(
        &self,
        id: Uuid,
        owner: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<JobLogEntry>>;
}

/// Principal lookups, credential slots, and the PIN attempt counter.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn insert_principal(&self, principal: &Principal) -> StoreResult<()>;
    async fn principal_by_email(&self, email: &str) -> StoreResult<Principal>;
    async fn principal_by_id(&self, id: Uuid) -> StoreResult<Principal>;
    async fn set_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<()>;
    async fn set_pin_hash(&self, id: Uuid, hash: &str) -> StoreResult<()>;
    async fn set_credential(
        &self,
        id: Uuid,
        kind: CredentialKind,
        slot: &CredentialSlot,
    ) -> StoreResult<()>;
    async fn set_credential_validity(
        &self,
        id: Uuid,
        kind: CredentialKind,
        valid: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn pin_attempt(&self, ip: &str, principal: Uuid)
    -> StoreResult<Option<PinAttempt>>;

    /// Atomic increment-or-insert of the attempt counter. Sets the blocked
    /// flag once the counter reaches `block_threshold`; an already-blocked
    /// record stays blocked. Returns the updated record.
    async fn increment_pin_attempt(
        &self,
        ip: &str,
        principal: Uuid,
        block_threshold: u32,
    ) -> StoreResult<PinAttempt>;

    /// Clear the counter after a successful verification.
    async fn clear_pin_attempts(&self, ip: &str, principal: Uuid) -> StoreResult<()>;
}

/// Project CRUD, owner-scoped. Deleting a project deletes its jobs.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn insert_project(&self, project: &Project) -> StoreResult<()>;
    async fn project_by_id(&self, id: Uuid, owner: Uuid) -> StoreResult<Project>;
    async fn list_projects(&self, owner: Uuid) -> StoreResult<Vec<Project>>;
    async fn update_project(
        &self,
        id: Uuid,
        owner: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<Project>;
    async fn delete_project(&self, id: Uuid, owner: Uuid) -> StoreResult<()>;
}

/// The queue's durable state, persisted on the job row.
///
/// A job's queue lifecycle is `waiting → active → completed | failed`,
/// with `active → waiting` on redelivery (retry backoff or stall).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Place (or re-place, for continue) a job on the queue.
    async fn enqueue(
        &self,
        job_id: Uuid,
        owner: Uuid,
        continue_from: Option<JobStatus>,
    ) -> StoreResult<()>;

    /// Claim the oldest available waiting job, or a stalled active one
    /// whose heartbeat is older than `stall_after`. Returns `None` when
    /// nothing is claimable or `max_active` jobs already run cluster-wide.
    async fn claim_next(
        &self,
        max_active: u32,
        stall_after: Duration,
    ) -> StoreResult<Option<JobTicket>>;

    /// Refresh the claim heartbeat for a running job.
    async fn heartbeat(&self, job_id: Uuid) -> StoreResult<()>;

    /// Return a failed delivery to the queue, available after `delay`.
    async fn requeue_after(&self, job_id: Uuid, delay: Duration) -> StoreResult<()>;

    async fn mark_completed(&self, job_id: Uuid) -> StoreResult<()>;
    async fn mark_failed(&self, job_id: Uuid) -> StoreResult<()>;

    async fn stats(&self) -> StoreResult<QueueStats>;

    /// Drop queue bookkeeping beyond the newest `keep_completed` completed
    /// and `keep_failed` failed records.
    async fn trim_finished(&self, keep_completed: u64, keep_failed: u64)
    -> StoreResult<()>;
}

/// Everything a process needs from the store, as one object-safe bundle.
pub trait Store:
    JobStore + PrincipalStore + ProjectStore + QueueStore + Send + Sync
{
}

impl<T> Store for T where T: JobStore + PrincipalStore + ProjectStore + QueueStore {}
