//! Job queue worker pool.
//!
//! The queue's durable state lives in the store ([`QueueStore`]); this
//! crate is the worker side: a claim loop with bounded concurrency, a
//! heartbeat per in-flight job so stalled claims get redelivered, retry
//! with exponential backoff, retention trimming, and graceful shutdown.
//!
//! The pool knows nothing about pipelines. A [`JobHandler`] runs a claimed
//! ticket; whatever it returns decides completion, redelivery, or the
//! failed terminal state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use draftmill_retry::{BackoffConfig, delay_for_attempt};
use draftmill_store::QueueStore;
use draftmill_types::JobTicket;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Claims older than this without a heartbeat are redelivered.
pub const STALL_INTERVAL: Duration = Duration::from_secs(60);

/// Heartbeat cadence for in-flight jobs.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Idle poll cadence when the queue is empty.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long in-flight jobs get to finish on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Completed queue records retained after trimming.
pub const KEEP_COMPLETED: u64 = 100;

/// Failed queue records retained after trimming.
pub const KEEP_FAILED: u64 = 50;

/// Runs one claimed job to completion.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Process a ticket. `Err` triggers the retry policy.
    async fn run(
        &self,
        ticket: &JobTicket,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Worker-pool tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// In-flight jobs per worker process.
    pub concurrency: u32,
    /// Cluster-wide cap on active jobs.
    pub max_active: u32,
    /// Redelivery backoff (3 attempts, 5 s base by default).
    pub backoff: BackoffConfig,
    pub stall_interval: Duration,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_active: 5,
            backoff: BackoffConfig::default(),
            stall_interval: STALL_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            poll_interval: POLL_INTERVAL,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

/// Create a shutdown signal pair for [`WorkerPool::run`].
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// The worker pool: claims tickets and fans them out to the handler.
pub struct WorkerPool {
    store: Arc<dyn QueueStore>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn QueueStore>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            handler,
            config,
        }
    }

    /// Run until the shutdown signal flips, then wait out the grace
    /// period for in-flight jobs. Jobs that outlive the grace period are
    /// abandoned; the stall detector hands them to another worker.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency as usize));
        let mut tasks: JoinSet<()> = JoinSet::new();
        info!(
            concurrency = self.config.concurrency,
            max_active = self.config.max_active,
            "worker pool started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            // Reap finished jobs so the set does not grow unbounded.
            while tasks.try_join_next().is_some() {}

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => continue,
            };

            let claim = self
                .store
                .claim_next(self.config.max_active, self.config.stall_interval)
                .await;

            match claim {
                Ok(Some(ticket)) => {
                    let store = self.store.clone();
                    let handler = self.handler.clone();
                    let config = self.config.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        process_ticket(store, handler, config, ticket).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "queue claim failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!("worker pool draining");
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            warn!("in-flight jobs exceeded the shutdown grace period; abandoning");
            tasks.abort_all();
        }
        info!("worker pool stopped");
    }
}

/// Run one ticket: heartbeat while the handler works, then settle the
/// queue record according to the outcome and the retry policy.
async fn process_ticket(
    store: Arc<dyn QueueStore>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    ticket: JobTicket,
) {
    info!(
        job_id = %ticket.job_id,
        attempt = ticket.attempt,
        continue_from = ticket.continue_from.map(|s| s.as_str()),
        "processing job"
    );

    let heartbeat = {
        let store = store.clone();
        let job_id = ticket.job_id;
        let interval = config.heartbeat_interval;
        async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = store.heartbeat(job_id).await {
                    warn!(job_id = %job_id, error = %e, "heartbeat failed");
                }
            }
        }
    };

    let result = tokio::select! {
        result = handler.run(&ticket) => result,
        // The heartbeat loop never completes.
        _ = heartbeat => unreachable!("heartbeat loop terminated"),
    };

    match result {
        Ok(()) => {
            if let Err(e) = store.mark_completed(ticket.job_id).await {
                error!(job_id = %ticket.job_id, error = %e, "failed to settle completed job");
            }
        }
        Err(e) => {
            if ticket.attempt >= config.backoff.max_attempts {
                error!(
                    job_id = %ticket.job_id,
                    attempt = ticket.attempt,
                    error = %e,
                    "job failed permanently"
                );
                if let Err(e) = store.mark_failed(ticket.job_id).await {
                    error!(job_id = %ticket.job_id, error = %e, "failed to settle failed job");
                }
            } else {
                let delay = delay_for_attempt(&config.backoff, ticket.attempt);
                warn!(
                    job_id = %ticket.job_id,
                    attempt = ticket.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "job failed, redelivering"
                );
                if let Err(e) = store.requeue_after(ticket.job_id, delay).await {
                    error!(job_id = %ticket.job_id, error = %e, "failed to requeue job");
                }
            }
        }
    }

    if let Err(e) = store.trim_finished(KEEP_COMPLETED, KEEP_FAILED).await {
        warn!(error = %e, "queue retention trim failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftmill_store::{JobStore, MemStore, QueueStore};
    use draftmill_types::{ArticleType, Job, JobConfig};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Recording {
        seen: Mutex<Vec<(Uuid, u32)>>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl JobHandler for Recording {
        async fn run(
            &self,
            ticket: &JobTicket,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.seen
                .lock()
                .unwrap()
                .push((ticket.job_id, ticket.attempt));
            if ticket.attempt <= self.fail_first_n {
                return Err("synthetic failure".into());
            }
            Ok(())
        }
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            max_active: 5,
            backoff: BackoffConfig {
                max_attempts: 3,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                jitter: 0.0,
                ..BackoffConfig::default()
            },
            stall_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            poll_interval: Duration::from_millis(5),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    async fn seed_job(store: &MemStore) -> Uuid {
        let owner = Uuid::new_v4();
        let job = Job::new(
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
        );
        store.insert_job(&job).await.unwrap();
        store.enqueue(job.id, owner, None).await.unwrap();
        job.id
    }

    async fn run_until_drained(store: Arc<MemStore>, handler: Arc<Recording>) {
        let pool = WorkerPool::new(store.clone(), handler, test_config());
        let (tx, rx) = shutdown_channel();
        let drive = tokio::spawn(async move { pool.run(rx).await });
        // Poll queue stats until nothing is waiting or active.
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let stats = store.stats().await.unwrap();
            if stats.waiting == 0 && stats.active == 0 {
                break;
            }
        }
        tx.send(true).unwrap();
        drive.await.unwrap();
    }

    #[tokio::test]
    async fn successful_job_is_settled_completed() {
        let store = Arc::new(MemStore::new());
        let job_id = seed_job(&store).await;
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail_first_n: 0,
        });
        run_until_drained(store.clone(), handler.clone()).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(job_id, 1)]);
    }

    #[tokio::test]
    async fn failing_job_retries_three_times_then_fails() {
        let store = Arc::new(MemStore::new());
        let job_id = seed_job(&store).await;
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail_first_n: u32::MAX,
        });
        run_until_drained(store.clone(), handler.clone()).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(job_id, 1), (job_id, 2), (job_id, 3)]);
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let store = Arc::new(MemStore::new());
        let job_id = seed_job(&store).await;
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail_first_n: 1,
        });
        run_until_drained(store.clone(), handler.clone()).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(job_id, 1), (job_id, 2)]);
    }

    #[tokio::test]
    async fn multiple_jobs_all_complete() {
        let store = Arc::new(MemStore::new());
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(seed_job(&store).await);
        }
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail_first_n: 0,
        });
        run_until_drained(store.clone(), handler.clone()).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.completed, 5);
        // With two slots completion order can interleave; every job ran once.
        let seen = handler.seen.lock().unwrap();
        let mut processed: Vec<Uuid> = seen.iter().map(|(id, _)| *id).collect();
        processed.sort();
        ids.sort();
        assert_eq!(processed, ids);
    }

    #[tokio::test]
    async fn shutdown_with_empty_queue_is_prompt() {
        let store = Arc::new(MemStore::new());
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail_first_n: 0,
        });
        let pool = WorkerPool::new(store, handler, test_config());
        let (tx, rx) = shutdown_channel();
        let drive = tokio::spawn(async move { pool.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), drive)
            .await
            .expect("shutdown within grace")
            .unwrap();
    }

    #[test]
    fn settle_thresholds_match_contract() {
        assert_eq!(KEEP_COMPLETED, 100);
        assert_eq!(KEEP_FAILED, 50);
        let config = WorkerConfig::default();
        assert_eq!(config.backoff.max_attempts, 3);
        assert_eq!(config.backoff.base_delay, Duration::from_secs(5));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_active, 5);
    }
}
