//! In-memory store implementation.
//!
//! Single-process stand-in for [`PgStore`] with the same statement-level
//! atomicity: every operation takes the store lock once, so concurrent
//! readers never observe a half-applied mutation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draftmill_types::{
    Block, CredentialKind, CredentialSlot, Job, JobLogEntry, JobStatus, JobTicket,
    PinAttempt, Principal, Project, QueueState, QueueStats, SerpEntry, StructureAnalysis,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    JobPage, JobStore, PrincipalStore, ProjectStore, QueueStore, StoreError, StoreResult,
};

#[derive(Debug, Clone)]
struct QueueRow {
    owner: Uuid,
    continue_from: Option<JobStatus>,
    state: QueueState,
    attempts: u32,
    seq: u64,
    available_at: DateTime<Utc>,
    heartbeat_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    queue: HashMap<Uuid, QueueRow>,
    queue_seq: u64,
    principals: HashMap<Uuid, Principal>,
    projects: HashMap<Uuid, Project>,
    pin_attempts: HashMap<(String, Uuid), PinAttempt>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemStore {
    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id.to_string()));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn fetch_job(&self, id: Uuid) -> StoreResult<Job> {
        let inner = self.inner.lock().await;
        inner.jobs.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn fetch_job_for_owner(&self, id: Uuid, owner: Uuid) -> StoreResult<Job> {
        let job = self.fetch_job(id).await?;
        if job.owner_id != owner {
            return Err(StoreError::NotFound);
        }
        Ok(job)
    }

    async fn list_jobs_in_project(
        &self,
        project: Uuid,
        owner: Uuid,
    ) -> StoreResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.project_id == project && j.owner_id == owner)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn list_jobs_for_owner(
        &self,
        owner: Uuid,
        status: Option<JobStatus>,
        offset: u64,
        limit: u64,
    ) -> StoreResult<JobPage> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.owner_id == owner && status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = jobs.len() as u64;
        let jobs = jobs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(JobPage { jobs, total })
    }

    async fn delete_job(&self, id: Uuid, owner: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get(&id) {
            Some(job) if job.owner_id == owner => {
                inner.jobs.remove(&id);
                inner.queue.remove(&id);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn append_log(&self, id: Uuid, entry: &JobLogEntry) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.log.push(entry.clone());
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        current_step: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.status = status;
        job.progress = progress;
        job.current_step = current_step.map(String::from);
        Ok(())
    }

    async fn set_started(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.started_at = Some(at);
        Ok(())
    }

    async fn set_completed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.completed_at = Some(at);
        Ok(())
    }

    async fn set_error(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.error = Some(error.to_string());
        Ok(())
    }

    async fn push_serp_entry(&self, id: Uuid, entry: &SerpEntry) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.serp_entries.push(entry.clone());
        Ok(())
    }

    async fn set_structure_analysis(
        &self,
        id: Uuid,
        analysis: &StructureAnalysis,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.structure_analysis = Some(analysis.clone());
        Ok(())
    }

    async fn set_blocks(&self, id: Uuid, blocks: &[Block]) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.blocks = blocks.to_vec();
        Ok(())
    }

    async fn set_article(&self, id: Uuid, article: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.article = Some(article.to_string());
        Ok(())
    }

    async fn set_seo(&self, id: Uuid, title: &str, description: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.seo_title = Some(title.to_string());
        job.seo_description = Some(description.to_string());
        Ok(())
    }

    async fn logs_since(
        &self,
        id: Uuid,
        owner: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<JobLogEntry>> {
        let job = self.fetch_job_for_owner(id, owner).await?;
        Ok(job
            .log
            .into_iter()
            .filter(|entry| since.is_none_or(|s| entry.timestamp >= s))
            .collect())
    }
}

#[async_trait]
impl PrincipalStore for MemStore {
    async fn insert_principal(&self, principal: &Principal) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .principals
            .values()
            .any(|p| p.email.eq_ignore_ascii_case(&principal.email))
        {
            return Err(StoreError::Duplicate(principal.email.clone()));
        }
        inner.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn principal_by_email(&self, email: &str) -> StoreResult<Principal> {
        let inner = self.inner.lock().await;
        inner
            .principals
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn principal_by_id(&self, id: Uuid) -> StoreResult<Principal> {
        let inner = self.inner.lock().await;
        inner.principals.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let principal = inner.principals.get_mut(&id).ok_or(StoreError::NotFound)?;
        principal.password_hash = hash.to_string();
        Ok(())
    }

    async fn set_pin_hash(&self, id: Uuid, hash: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let principal = inner.principals.get_mut(&id).ok_or(StoreError::NotFound)?;
        principal.pin_hash = Some(hash.to_string());
        Ok(())
    }

    async fn set_credential(
        &self,
        id: Uuid,
        kind: CredentialKind,
        slot: &CredentialSlot,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let principal = inner.principals.get_mut(&id).ok_or(StoreError::NotFound)?;
        *principal.credentials.get_mut(kind) = slot.clone();
        Ok(())
    }

    async fn set_credential_validity(
        &self,
        id: Uuid,
        kind: CredentialKind,
        valid: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let principal = inner.principals.get_mut(&id).ok_or(StoreError::NotFound)?;
        let slot = principal.credentials.get_mut(kind);
        slot.valid = Some(valid);
        slot.last_checked = Some(at);
        Ok(())
    }

    async fn pin_attempt(
        &self,
        ip: &str,
        principal: Uuid,
    ) -> StoreResult<Option<PinAttempt>> {
        let inner = self.inner.lock().await;
        Ok(inner.pin_attempts.get(&(ip.to_string(), principal)).cloned())
    }

    async fn increment_pin_attempt(
        &self,
        ip: &str,
        principal: Uuid,
        block_threshold: u32,
    ) -> StoreResult<PinAttempt> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .pin_attempts
            .entry((ip.to_string(), principal))
            .or_insert_with(|| PinAttempt {
                ip: ip.to_string(),
                principal_id: principal,
                attempts: 0,
                blocked: false,
                last_attempt: Utc::now(),
            });
        record.attempts += 1;
        record.blocked = record.blocked || record.attempts >= block_threshold;
        record.last_attempt = Utc::now();
        Ok(record.clone())
    }

    async fn clear_pin_attempts(&self, ip: &str, principal: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.pin_attempts.remove(&(ip.to_string(), principal));
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemStore {
    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn project_by_id(&self, id: Uuid, owner: Uuid) -> StoreResult<Project> {
        let inner = self.inner.lock().await;
        inner
            .projects
            .get(&id)
            .filter(|p| p.owner_id == owner)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_projects(&self, owner: Uuid) -> StoreResult<Vec<Project>> {
        let inner = self.inner.lock().await;
        let mut projects: Vec<Project> = inner
            .projects
            .values()
            .filter(|p| p.owner_id == owner)
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn update_project(
        &self,
        id: Uuid,
        owner: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<Project> {
        let mut inner = self.inner.lock().await;
        let project = inner
            .projects
            .get_mut(&id)
            .filter(|p| p.owner_id == owner)
            .ok_or(StoreError::NotFound)?;
        project.name = name.to_string();
        project.description = description.map(String::from);
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn delete_project(&self, id: Uuid, owner: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.projects.get(&id) {
            Some(p) if p.owner_id == owner => {
                inner.projects.remove(&id);
                // Cascade: descendant jobs and their queue rows go with it.
                let doomed: Vec<Uuid> = inner
                    .jobs
                    .values()
                    .filter(|j| j.project_id == id)
                    .map(|j| j.id)
                    .collect();
                for job_id in doomed {
                    inner.jobs.remove(&job_id);
                    inner.queue.remove(&job_id);
                }
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }
}

#[async_trait]
impl QueueStore for MemStore {
    async fn enqueue(
        &self,
        job_id: Uuid,
        owner: Uuid,
        continue_from: Option<JobStatus>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue_seq += 1;
        let seq = inner.queue_seq;
        inner.queue.insert(
            job_id,
            QueueRow {
                owner,
                continue_from,
                state: QueueState::Waiting,
                attempts: 0,
                seq,
                available_at: Utc::now(),
                heartbeat_at: None,
                finished_at: None,
            },
        );
        Ok(())
    }

    async fn claim_next(
        &self,
        max_active: u32,
        stall_after: Duration,
    ) -> StoreResult<Option<JobTicket>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let stall_cutoff = now - chrono::Duration::from_std(stall_after).unwrap_or_default();

        let live_active = inner
            .queue
            .values()
            .filter(|row| {
                row.state == QueueState::Active
                    && row.heartbeat_at.is_some_and(|hb| hb >= stall_cutoff)
            })
            .count() as u32;
        if live_active >= max_active {
            return Ok(None);
        }

        let candidate = inner
            .queue
            .iter()
            .filter(|(_, row)| match row.state {
                QueueState::Waiting => row.available_at <= now,
                // A held claim whose heartbeat went silent is claimable.
                QueueState::Active => row.heartbeat_at.is_none_or(|hb| hb < stall_cutoff),
                _ => false,
            })
            .min_by_key(|(_, row)| row.seq)
            .map(|(id, _)| *id);

        let Some(job_id) = candidate else {
            return Ok(None);
        };
        let row = inner.queue.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        row.state = QueueState::Active;
        row.attempts += 1;
        row.heartbeat_at = Some(now);
        Ok(Some(JobTicket {
            job_id,
            owner_id: row.owner,
            continue_from: row.continue_from,
            attempt: row.attempts,
        }))
    }

    async fn heartbeat(&self, job_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let row = inner.queue.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        row.heartbeat_at = Some(Utc::now());
        Ok(())
    }

    async fn requeue_after(&self, job_id: Uuid, delay: Duration) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let row = inner.queue.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        row.state = QueueState::Waiting;
        row.heartbeat_at = None;
        row.available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let row = inner.queue.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        row.state = QueueState::Completed;
        row.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let row = inner.queue.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        row.state = QueueState::Failed;
        row.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn stats(&self) -> StoreResult<QueueStats> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for row in inner.queue.values() {
            match row.state {
                QueueState::Waiting => stats.waiting += 1,
                QueueState::Active => stats.active += 1,
                QueueState::Completed => stats.completed += 1,
                QueueState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn trim_finished(
        &self,
        keep_completed: u64,
        keep_failed: u64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        for (state, keep) in [
            (QueueState::Completed, keep_completed),
            (QueueState::Failed, keep_failed),
        ] {
            let mut finished: Vec<(Uuid, DateTime<Utc>)> = inner
                .queue
                .iter()
                .filter(|(_, row)| row.state == state)
                .map(|(id, row)| (*id, row.finished_at.unwrap_or(row.available_at)))
                .collect();
            finished.sort_by(|a, b| b.1.cmp(&a.1));
            for (id, _) in finished.into_iter().skip(keep as usize) {
                inner.queue.remove(&id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftmill_types::{ArticleType, JobConfig, LogLevel};

    fn job(owner: Uuid) -> Job {
        Job::new(
            Uuid::new_v4(),
            owner,
            JobConfig {
                main_keyword: "kw".to_string(),
                article_type: ArticleType::Informational,
                keywords: vec![],
                language: "en".to_string(),
                region: "us".to_string(),
                lsi_keywords: vec![],
                style_comment: None,
                continuous: true,
                internal_links: vec![],
            },
        )
    }

    #[tokio::test]
    async fn ownership_check_reads_as_missing() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        let j = job(owner);
        store.insert_job(&j).await.unwrap();

        assert!(store.fetch_job_for_owner(j.id, owner).await.is_ok());
        let stranger = Uuid::new_v4();
        assert!(matches!(
            store.fetch_job_for_owner(j.id, stranger).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn log_append_is_ordered_and_additive() {
        let store = MemStore::new();
        let j = job(Uuid::new_v4());
        store.insert_job(&j).await.unwrap();

        for i in 0..5 {
            store
                .append_log(j.id, &JobLogEntry::new(LogLevel::Info, format!("e{i}")))
                .await
                .unwrap();
        }
        let fetched = store.fetch_job(j.id).await.unwrap();
        assert_eq!(fetched.log.len(), 5);
        assert_eq!(fetched.log[0].message, "e0");
        assert_eq!(fetched.log[4].message, "e4");
    }

    #[tokio::test]
    async fn logs_since_filters_by_instant() {
        let store = MemStore::new();
        let j = job(Uuid::new_v4());
        store.insert_job(&j).await.unwrap();

        let early = JobLogEntry::new(LogLevel::Info, "early");
        store.append_log(j.id, &early).await.unwrap();
        let cutoff = Utc::now();
        let late = JobLogEntry::new(LogLevel::Info, "late");
        store.append_log(j.id, &late).await.unwrap();

        let slice = store
            .logs_since(j.id, j.owner_id, Some(cutoff))
            .await
            .unwrap();
        assert_eq!(slice.len(), 1);
        assert_eq!(slice[0].message, "late");
    }

    #[tokio::test]
    async fn list_for_owner_paginates_and_filters() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        for _ in 0..5 {
            store.insert_job(&job(owner)).await.unwrap();
        }
        let mut failed = job(owner);
        failed.status = JobStatus::Failed;
        store.insert_job(&failed).await.unwrap();

        let page = store
            .list_jobs_for_owner(owner, None, 0, 4)
            .await
            .unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.jobs.len(), 4);

        let page = store
            .list_jobs_for_owner(owner, Some(JobStatus::Failed), 0, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn queue_claims_in_fifo_order() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        let a = job(owner);
        let b = job(owner);
        store.insert_job(&a).await.unwrap();
        store.insert_job(&b).await.unwrap();
        store.enqueue(a.id, owner, None).await.unwrap();
        store.enqueue(b.id, owner, None).await.unwrap();

        let first = store
            .claim_next(5, Duration::from_secs(60))
            .await
            .unwrap()
            .expect("first claim");
        assert_eq!(first.job_id, a.id);
        assert_eq!(first.attempt, 1);

        let second = store
            .claim_next(5, Duration::from_secs(60))
            .await
            .unwrap()
            .expect("second claim");
        assert_eq!(second.job_id, b.id);
    }

    #[tokio::test]
    async fn claim_respects_cluster_cap() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        for _ in 0..3 {
            let j = job(owner);
            store.insert_job(&j).await.unwrap();
            store.enqueue(j.id, owner, None).await.unwrap();
        }
        assert!(store.claim_next(2, Duration::from_secs(60)).await.unwrap().is_some());
        assert!(store.claim_next(2, Duration::from_secs(60)).await.unwrap().is_some());
        assert!(store.claim_next(2, Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stalled_claim_is_redelivered_with_bumped_attempt() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        let j = job(owner);
        store.insert_job(&j).await.unwrap();
        store.enqueue(j.id, owner, None).await.unwrap();

        let first = store
            .claim_next(5, Duration::from_secs(60))
            .await
            .unwrap()
            .expect("claim");
        assert_eq!(first.attempt, 1);

        // Zero stall interval: the held claim is immediately stale.
        let second = store
            .claim_next(5, Duration::ZERO)
            .await
            .unwrap()
            .expect("stalled reclaim");
        assert_eq!(second.job_id, j.id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn requeued_job_waits_out_its_delay() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        let j = job(owner);
        store.insert_job(&j).await.unwrap();
        store.enqueue(j.id, owner, None).await.unwrap();
        store.claim_next(5, Duration::from_secs(60)).await.unwrap();
        store
            .requeue_after(j.id, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(
            store
                .claim_next(5, Duration::from_secs(60))
                .await
                .unwrap()
                .is_none()
        );
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.waiting, 1);
    }

    #[tokio::test]
    async fn finished_rows_are_trimmed_to_retention() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        for _ in 0..4 {
            let j = job(owner);
            store.insert_job(&j).await.unwrap();
            store.enqueue(j.id, owner, None).await.unwrap();
            store.claim_next(10, Duration::from_secs(60)).await.unwrap();
            store.mark_completed(j.id).await.unwrap();
        }
        store.trim_finished(2, 2).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test]
    async fn pin_attempts_count_and_block() {
        let store = MemStore::new();
        let principal = Uuid::new_v4();
        for i in 1..=5 {
            let record = store
                .increment_pin_attempt("203.0.113.9", principal, 5)
                .await
                .unwrap();
            assert_eq!(record.attempts, i);
            assert_eq!(record.blocked, i >= 5);
        }
        // Separate IP has its own counter.
        let other = store
            .increment_pin_attempt("198.51.100.1", principal, 5)
            .await
            .unwrap();
        assert_eq!(other.attempts, 1);
        assert!(!other.blocked);

        store.clear_pin_attempts("203.0.113.9", principal).await.unwrap();
        assert!(
            store
                .pin_attempt("203.0.113.9", principal)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn project_delete_cascades_to_jobs() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        let project = Project {
            id: Uuid::new_v4(),
            owner_id: owner,
            name: "p".to_string(),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_project(&project).await.unwrap();
        let mut j = job(owner);
        j.project_id = project.id;
        store.insert_job(&j).await.unwrap();

        store.delete_project(project.id, owner).await.unwrap();
        assert!(matches!(
            store.fetch_job(j.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemStore::new();
        let p = Principal {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            password_hash: "hash".to_string(),
            pin_hash: None,
            credentials: Default::default(),
            created_at: Utc::now(),
        };
        store.insert_principal(&p).await.unwrap();
        let mut dup = p.clone();
        dup.id = Uuid::new_v4();
        dup.email = "USER@example.com".to_string();
        assert!(matches!(
            store.insert_principal(&dup).await,
            Err(StoreError::Duplicate(_))
        ));
    }
}
