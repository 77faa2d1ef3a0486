// Host-side record of the last-known state of each export job.
//
// The poller never touches this; the HTTP host records every job it starts or
// polls so terminal results can be served again without asking the provider.
// Entries are scoped to the bearer that observed them: a caller only ever sees
// results recorded under its own token fingerprint.

use super::ExportJob;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration};

/// Last-known job state and when it was observed.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedJob {
    #[serde(flatten)]
    pub job: ExportJob,
    pub updated_at: DateTime<Utc>,
}

/// (owner fingerprint, job handle)
type JobKey = (String, String);

/// Owner + job handle → last-known state. In-memory only (resets on restart).
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<JobKey, TrackedJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `job` for `owner` unless a terminal result is already recorded
    /// for that owner and handle.
    ///
    /// Returns the job now on record.
    pub fn record(&self, owner: &str, job: ExportJob) -> ExportJob {
        let key = (owner.to_string(), job.polling_location().to_string());
        let mut entry = self.jobs.entry(key).or_insert_with(|| TrackedJob {
            job: job.clone(),
            updated_at: Utc::now(),
        });

        if !entry.job.is_terminal() {
            entry.job = job;
            entry.updated_at = Utc::now();
        }
        entry.job.clone()
    }

    pub fn get(&self, owner: &str, polling_location: &str) -> Option<ExportJob> {
        self.jobs
            .get(&(owner.to_string(), polling_location.to_string()))
            .map(|e| e.job.clone())
    }

    /// Snapshot of the jobs recorded for `owner`, most recently updated first.
    pub fn list(&self, owner: &str) -> Vec<TrackedJob> {
        let mut jobs: Vec<TrackedJob> = self
            .jobs
            .iter()
            .filter(|e| e.key().0 == owner)
            .map(|e| e.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs
    }

    pub fn remove(&self, owner: &str, polling_location: &str) -> Option<ExportJob> {
        self.jobs
            .remove(&(owner.to_string(), polling_location.to_string()))
            .map(|(_, e)| e.job)
    }

    /// Drop every entry not updated within `max_age`.
    pub fn cleanup_expired(&self, max_age: Duration) {
        let now = Utc::now();
        self.jobs.retain(|_, e| now - e.updated_at < max_age);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Background task to evict stale job records.
pub async fn run_job_cleanup(
    registry: Arc<JobRegistry>,
    retention_seconds: i64,
    interval_seconds: u64,
) {
    let mut ticker = interval(TokioDuration::from_secs(interval_seconds));
    let max_age = Duration::seconds(retention_seconds);

    loop {
        ticker.tick().await;
        registry.cleanup_expired(max_age);
        tracing::debug!("Cleaned up stale export jobs. Remaining: {}", registry.len());
    }
}
