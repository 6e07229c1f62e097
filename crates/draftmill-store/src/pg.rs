//! Postgres store implementation.
//!
//! Jobs are rows with jsonb artifact columns so the log append and every
//! artifact update are single-statement atomic writes. Queue bookkeeping
//! lives on the same row; claims use `FOR UPDATE SKIP LOCKED` so workers
//! on different hosts never double-claim.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draftmill_types::{
    Block, CredentialKind, CredentialSet, CredentialSlot, Job, JobConfig, JobLogEntry,
    JobStatus, JobTicket, PinAttempt, Principal, Project, QueueState, QueueStats,
    SerpEntry, StructureAnalysis,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::{
    JobPage, JobStore, PrincipalStore, ProjectStore, QueueStore, StoreError, StoreResult,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS principals (
    id UUID PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    pin_hash TEXT,
    credentials JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id UUID PRIMARY KEY,
    owner_id UUID NOT NULL REFERENCES principals(id),
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    owner_id UUID NOT NULL,
    config JSONB NOT NULL,
    status TEXT NOT NULL,
    progress INT NOT NULL DEFAULT 0,
    current_step TEXT,
    log JSONB NOT NULL DEFAULT '[]'::jsonb,
    serp_entries JSONB NOT NULL DEFAULT '[]'::jsonb,
    structure_analysis JSONB,
    blocks JSONB NOT NULL DEFAULT '[]'::jsonb,
    article TEXT,
    seo_title TEXT,
    seo_description TEXT,
    error TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    queue_state TEXT,
    queue_attempts INT NOT NULL DEFAULT 0,
    queue_seq BIGINT,
    continue_from TEXT,
    available_at TIMESTAMPTZ,
    heartbeat_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ
);

CREATE SEQUENCE IF NOT EXISTS jobs_queue_seq;

CREATE TABLE IF NOT EXISTS pin_attempts (
    ip TEXT NOT NULL,
    principal_id UUID NOT NULL,
    attempts INT NOT NULL DEFAULT 0,
    blocked BOOLEAN NOT NULL DEFAULT FALSE,
    last_attempt TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (ip, principal_id)
);

CREATE INDEX IF NOT EXISTS jobs_owner_idx ON jobs (owner_id, created_at DESC);
CREATE INDEX IF NOT EXISTS jobs_project_idx ON jobs (project_id, created_at DESC);
CREATE INDEX IF NOT EXISTS jobs_queue_idx ON jobs (queue_state, available_at, queue_seq);
"#;

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and ensure the schema exists.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool (tests, pool sharing).
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> StoreResult<Job> {
    let config: serde_json::Value = row.try_get("config")?;
    let config: JobConfig = serde_json::from_value(config)?;
    let status: String = row.try_get("status")?;
    let status = JobStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status}")))?;
    let log: serde_json::Value = row.try_get("log")?;
    let serp: serde_json::Value = row.try_get("serp_entries")?;
    let analysis: Option<serde_json::Value> = row.try_get("structure_analysis")?;
    let blocks: serde_json::Value = row.try_get("blocks")?;

    Ok(Job {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        owner_id: row.try_get("owner_id")?,
        config,
        status,
        progress: row.try_get::<i32, _>("progress")? as u8,
        current_step: row.try_get("current_step")?,
        log: serde_json::from_value::<Vec<JobLogEntry>>(log)?,
        serp_entries: serde_json::from_value::<Vec<SerpEntry>>(serp)?,
        structure_analysis: analysis
            .map(serde_json::from_value::<StructureAnalysis>)
            .transpose()?,
        blocks: serde_json::from_value::<Vec<Block>>(blocks)?,
        article: row.try_get("article")?,
        seo_title: row.try_get("seo_title")?,
        seo_description: row.try_get("seo_description")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn principal_from_row(row: &PgRow) -> StoreResult<Principal> {
    let credentials: serde_json::Value = row.try_get("credentials")?;
    Ok(Principal {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        pin_hash: row.try_get("pin_hash")?,
        credentials: serde_json::from_value::<CredentialSet>(credentials)?,
        created_at: row.try_get("created_at")?,
    })
}

fn project_from_row(row: &PgRow) -> StoreResult<Project> {
    Ok(Project {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn stall_cutoff(stall_after: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(stall_after).unwrap_or_default()
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, project_id, owner_id, config, status, progress, \
             current_step, log, serp_entries, structure_analysis, blocks, article, \
             seo_title, seo_description, error, created_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
             $16, $17, $18)",
        )
        .bind(job.id)
        .bind(job.project_id)
        .bind(job.owner_id)
        .bind(serde_json::to_value(&job.config)?)
        .bind(job.status.as_str())
        .bind(job.progress as i32)
        .bind(&job.current_step)
        .bind(serde_json::to_value(&job.log)?)
        .bind(serde_json::to_value(&job.serp_entries)?)
        .bind(
            job.structure_analysis
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(serde_json::to_value(&job.blocks)?)
        .bind(&job.article)
        .bind(&job.seo_title)
        .bind(&job.seo_description)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_job(&self, id: Uuid) -> StoreResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        job_from_row(&row)
    }

    async fn fetch_job_for_owner(&self, id: Uuid, owner: Uuid) -> StoreResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner)
            .fetch_one(&self.pool)
            .await?;
        job_from_row(&row)
    }

    async fn list_jobs_in_project(
        &self,
        project: Uuid,
        owner: Uuid,
    ) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE project_id = $1 AND owner_id = $2 \
             ORDER BY created_at DESC",
        )
        .bind(project)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn list_jobs_for_owner(
        &self,
        owner: Uuid,
        status: Option<JobStatus>,
        offset: u64,
        limit: u64,
    ) -> StoreResult<JobPage> {
        let status_str = status.map(|s| s.as_str());
        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM jobs WHERE owner_id = $1 \
             AND ($2::text IS NULL OR status = $2)",
        )
        .bind(owner)
        .bind(status_str)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE owner_id = $1 \
             AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC OFFSET $3 LIMIT $4",
        )
        .bind(owner)
        .bind(status_str)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(JobPage {
            jobs: rows.iter().map(job_from_row).collect::<StoreResult<_>>()?,
            total: total as u64,
        })
    }

    async fn delete_job(&self, id: Uuid, owner: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_log(&self, id: Uuid, entry: &JobLogEntry) -> StoreResult<()> {
        // jsonb || jsonb appends array elements; the entry ships as a
        // one-element array.
        let result = sqlx::query("UPDATE jobs SET log = log || $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(vec![entry])?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        current_step: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, progress = $3, current_step = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(progress as i32)
        .bind(current_step)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_started(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET started_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_completed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET completed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_error(&self, id: Uuid, error: &str) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn push_serp_entry(&self, id: Uuid, entry: &SerpEntry) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET serp_entries = serp_entries || $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(vec![entry])?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_structure_analysis(
        &self,
        id: Uuid,
        analysis: &StructureAnalysis,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET structure_analysis = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(analysis)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_blocks(&self, id: Uuid, blocks: &[Block]) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET blocks = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(blocks)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_article(&self, id: Uuid, article: &str) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET article = $2 WHERE id = $1")
            .bind(id)
            .bind(article)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_seo(&self, id: Uuid, title: &str, description: &str) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET seo_title = $2, seo_description = $3 WHERE id = $1")
            .bind(id)
            .bind(title)
            .bind(description)
            .execute(&self.pool)
            .await?;
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
impl PrincipalStore for PgStore {
    async fn insert_principal(&self, principal: &Principal) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO principals (id, email, password_hash, pin_hash, credentials, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(principal.id)
        .bind(&principal.email)
        .bind(&principal.password_hash)
        .bind(&principal.pin_hash)
        .bind(serde_json::to_value(&principal.credentials)?)
        .bind(principal.created_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(principal.email.clone()));
        }
        Ok(())
    }

    async fn principal_by_email(&self, email: &str) -> StoreResult<Principal> {
        let row = sqlx::query("SELECT * FROM principals WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        principal_from_row(&row)
    }

    async fn principal_by_id(&self, id: Uuid) -> StoreResult<Principal> {
        let row = sqlx::query("SELECT * FROM principals WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        principal_from_row(&row)
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE principals SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_pin_hash(&self, id: Uuid, hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE principals SET pin_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_credential(
        &self,
        id: Uuid,
        kind: CredentialKind,
        slot: &CredentialSlot,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE principals SET credentials = \
             jsonb_set(credentials, ARRAY[$2], $3, true) WHERE id = $1",
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(serde_json::to_value(slot)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_credential_validity(
        &self,
        id: Uuid,
        kind: CredentialKind,
        valid: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let patch = serde_json::json!({
            "valid": valid,
            "lastChecked": at,
        });
        sqlx::query(
            "UPDATE principals SET credentials = jsonb_set(credentials, ARRAY[$2], \
             COALESCE(credentials -> $2, '{}'::jsonb) || $3, true) WHERE id = $1",
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(patch)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pin_attempt(
        &self,
        ip: &str,
        principal: Uuid,
    ) -> StoreResult<Option<PinAttempt>> {
        let row = sqlx::query(
            "SELECT * FROM pin_attempts WHERE ip = $1 AND principal_id = $2",
        )
        .bind(ip)
        .bind(principal)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(PinAttempt {
                ip: row.try_get("ip")?,
                principal_id: row.try_get("principal_id")?,
                attempts: row.try_get::<i32, _>("attempts")? as u32,
                blocked: row.try_get("blocked")?,
                last_attempt: row.try_get("last_attempt")?,
            })
        })
        .transpose()
    }

    async fn increment_pin_attempt(
        &self,
        ip: &str,
        principal: Uuid,
        block_threshold: u32,
    ) -> StoreResult<PinAttempt> {
        let row = sqlx::query(
            "INSERT INTO pin_attempts (ip, principal_id, attempts, blocked, last_attempt) \
             VALUES ($1, $2, 1, (1 >= $3), now()) \
             ON CONFLICT (ip, principal_id) DO UPDATE SET \
             attempts = pin_attempts.attempts + 1, \
             blocked = pin_attempts.blocked OR pin_attempts.attempts + 1 >= $3, \
             last_attempt = now() \
             RETURNING attempts, blocked, last_attempt",
        )
        .bind(ip)
        .bind(principal)
        .bind(block_threshold as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(PinAttempt {
            ip: ip.to_string(),
            principal_id: principal,
            attempts: row.try_get::<i32, _>("attempts")? as u32,
            blocked: row.try_get("blocked")?,
            last_attempt: row.try_get("last_attempt")?,
        })
    }

    async fn clear_pin_attempts(&self, ip: &str, principal: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM pin_attempts WHERE ip = $1 AND principal_id = $2")
            .bind(ip)
            .bind(principal)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for PgStore {
    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO projects (id, owner_id, name, description, created_at, \
             updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(project.id)
        .bind(project.owner_id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn project_by_id(&self, id: Uuid, owner: Uuid) -> StoreResult<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner)
            .fetch_one(&self.pool)
            .await?;
        project_from_row(&row)
    }

    async fn list_projects(&self, owner: Uuid) -> StoreResult<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT * FROM projects WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn update_project(
        &self,
        id: Uuid,
        owner: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<Project> {
        let row = sqlx::query(
            "UPDATE projects SET name = $3, description = $4, updated_at = now() \
             WHERE id = $1 AND owner_id = $2 RETURNING *",
        )
        .bind(id)
        .bind(owner)
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        project_from_row(&row)
    }

    async fn delete_project(&self, id: Uuid, owner: Uuid) -> StoreResult<()> {
        // Jobs cascade via the foreign key.
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for PgStore {
    async fn enqueue(
        &self,
        job_id: Uuid,
        owner: Uuid,
        continue_from: Option<JobStatus>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET queue_state = 'waiting', queue_attempts = 0, \
             queue_seq = nextval('jobs_queue_seq'), continue_from = $3, \
             available_at = now(), heartbeat_at = NULL, finished_at = NULL \
             WHERE id = $1 AND owner_id = $2",
        )
        .bind(job_id)
        .bind(owner)
        .bind(continue_from.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn claim_next(
        &self,
        max_active: u32,
        stall_after: Duration,
    ) -> StoreResult<Option<JobTicket>> {
        let cutoff = stall_cutoff(stall_after);
        let row = sqlx::query(
            "WITH live AS ( \
                 SELECT count(*) AS n FROM jobs \
                 WHERE queue_state = 'active' AND heartbeat_at >= $2 \
             ), candidate AS ( \
                 SELECT id FROM jobs \
                 WHERE (queue_state = 'waiting' AND available_at <= now()) \
                    OR (queue_state = 'active' \
                        AND (heartbeat_at IS NULL OR heartbeat_at < $2)) \
                 ORDER BY queue_seq \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             UPDATE jobs SET queue_state = 'active', \
                 queue_attempts = jobs.queue_attempts + 1, heartbeat_at = now() \
             FROM candidate, live \
             WHERE jobs.id = candidate.id AND live.n < $1 \
             RETURNING jobs.id, jobs.owner_id, jobs.continue_from, jobs.queue_attempts",
        )
        .bind(max_active as i64)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let continue_from: Option<String> = row.try_get("continue_from")?;
            Ok(JobTicket {
                job_id: row.try_get("id")?,
                owner_id: row.try_get("owner_id")?,
                continue_from: continue_from.as_deref().and_then(JobStatus::parse),
                attempt: row.try_get::<i32, _>("queue_attempts")? as u32,
            })
        })
        .transpose()
    }

    async fn heartbeat(&self, job_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET heartbeat_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn requeue_after(&self, job_id: Uuid, delay: Duration) -> StoreResult<()> {
        let available_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        sqlx::query(
            "UPDATE jobs SET queue_state = 'waiting', heartbeat_at = NULL, \
             available_at = $2 WHERE id = $1",
        )
        .bind(job_id)
        .bind(available_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET queue_state = 'completed', finished_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET queue_state = 'failed', finished_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> StoreResult<QueueStats> {
        let rows = sqlx::query(
            "SELECT queue_state, count(*) AS n FROM jobs \
             WHERE queue_state IS NOT NULL GROUP BY queue_state",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut stats = QueueStats::default();
        for row in rows {
            let state: String = row.try_get("queue_state")?;
            let n: i64 = row.try_get("n")?;
            match state.as_str() {
                s if s == QueueState::Waiting.as_str() => stats.waiting = n as u64,
                s if s == QueueState::Active.as_str() => stats.active = n as u64,
                s if s == QueueState::Completed.as_str() => stats.completed = n as u64,
                s if s == QueueState::Failed.as_str() => stats.failed = n as u64,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn trim_finished(
        &self,
        keep_completed: u64,
        keep_failed: u64,
    ) -> StoreResult<()> {
        for (state, keep) in [("completed", keep_completed), ("failed", keep_failed)] {
            sqlx::query(
                "UPDATE jobs SET queue_state = NULL, queue_seq = NULL \
                 WHERE id IN ( \
                     SELECT id FROM jobs WHERE queue_state = $1 \
                     ORDER BY finished_at DESC NULLS LAST OFFSET $2 \
                 )",
            )
            .bind(state)
            .bind(keep as i64)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}
