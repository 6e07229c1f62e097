//! Prometheus collectors.
//!
//! One [`Metrics`] instance per process, owned by the application state
//! and served in text format at `/api/metrics`.

use draftmill_types::QueueStats;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

/// Process-wide metric registry and collectors.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub http_duration: HistogramVec,
    pub queue_jobs: IntGaugeVec,
    pub jobs_completed: IntCounter,
    pub jobs_failed: IntCounter,
    pub llm_tokens: IntCounterVec,
    pub provider_requests: IntCounterVec,
}

impl Metrics {
    /// Build and register every collector.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("draftmill_http_requests_total", "HTTP requests by outcome"),
            &["method", "path", "status"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "draftmill_http_request_duration_seconds",
                "HTTP request latency",
            ),
            &["method", "path"],
        )?;
        let queue_jobs = IntGaugeVec::new(
            Opts::new("draftmill_queue_jobs", "Queue depth by state"),
            &["state"],
        )?;
        let jobs_completed = IntCounter::new(
            "draftmill_jobs_completed_total",
            "Jobs that reached the completed state",
        )?;
        let jobs_failed = IntCounter::new(
            "draftmill_jobs_failed_total",
            "Jobs that reached the failed state",
        )?;
        let llm_tokens = IntCounterVec::new(
            Opts::new("draftmill_llm_tokens_total", "LLM tokens consumed"),
            &["kind"],
        )?;
        let provider_requests = IntCounterVec::new(
            Opts::new(
                "draftmill_provider_requests_total",
                "Outbound provider calls by outcome",
            ),
            &["provider", "outcome"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;
        registry.register(Box::new(queue_jobs.clone()))?;
        registry.register(Box::new(jobs_completed.clone()))?;
        registry.register(Box::new(jobs_failed.clone()))?;
        registry.register(Box::new(llm_tokens.clone()))?;
        registry.register(Box::new(provider_requests.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            http_duration,
            queue_jobs,
            jobs_completed,
            jobs_failed,
            llm_tokens,
            provider_requests,
        })
    }

    /// Record one served HTTP request.
    pub fn observe_http(&self, method: &str, path: &str, status: u16, seconds: f64) {
        self.http_requests
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.http_duration
            .with_label_values(&[method, path])
            .observe(seconds);
    }

    /// Refresh the queue-depth gauges from a stats snapshot.
    pub fn set_queue_stats(&self, stats: &QueueStats) {
        self.queue_jobs
            .with_label_values(&["waiting"])
            .set(stats.waiting as i64);
        self.queue_jobs
            .with_label_values(&["active"])
            .set(stats.active as i64);
        self.queue_jobs
            .with_label_values(&["completed"])
            .set(stats.completed as i64);
        self.queue_jobs
            .with_label_values(&["failed"])
            .set(stats.failed as i64);
    }

    /// Record token consumption from one job invocation.
    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        self.llm_tokens
            .with_label_values(&["prompt"])
            .inc_by(prompt);
        self.llm_tokens
            .with_label_values(&["completion"])
            .inc_by(completion);
    }

    /// Encode every collector in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectors_register_once() {
        let metrics = Metrics::new().expect("metrics");
        metrics.observe_http("GET", "/api/health", 200, 0.003);
        metrics.record_tokens(120, 45);
        metrics.jobs_completed.inc();

        let text = metrics.encode();
        assert!(text.contains("draftmill_http_requests_total"));
        assert!(text.contains("draftmill_llm_tokens_total"));
        assert!(text.contains("draftmill_jobs_completed_total 1"));
    }

    #[test]
    fn queue_gauges_track_stats() {
        let metrics = Metrics::new().expect("metrics");
        metrics.set_queue_stats(&QueueStats {
            waiting: 3,
            active: 2,
            completed: 10,
            failed: 1,
        });
        let text = metrics.encode();
        assert!(text.contains("draftmill_queue_jobs{state=\"waiting\"} 3"));
        assert!(text.contains("draftmill_queue_jobs{state=\"failed\"} 1"));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let metrics = Metrics::new().expect("metrics");
        let duplicate = IntCounter::new(
            "draftmill_jobs_completed_total",
            "Jobs that reached the completed state",
        )
        .expect("counter");
        assert!(metrics.registry.register(Box::new(duplicate)).is_err());
    }
}
