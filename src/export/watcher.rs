//! Caller-side polling cadence.
//!
//! Drives [`ExportPoller::poll_step`] until the job is terminal. Polls for one
//! job run strictly one after another. By default the interval is fixed and
//! `Retry-After` is ignored; opt in with `honor_retry_after`.

use super::{ExportJob, ExportPoller, PollStep};
use crate::config::PollingConfig;
use crate::error::ExportError;
use crate::oauth::AccessCredential;
use std::time::Duration;
use tokio::time::Instant;

/// How often to poll and when to give up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub honor_retry_after: bool,
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

impl PollPolicy {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            honor_retry_after: config.honor_retry_after,
            max_wait: config.max_wait(),
        }
    }

    /// Delay before the next poll after `step`.
    pub fn delay_after(&self, step: &PollStep) -> Duration {
        match step.retry_after {
            Some(hint) if self.honor_retry_after => hint,
            _ => self.interval,
        }
    }
}

/// Poll `job` until it completes or fails.
///
/// A failed job is returned as a value; use [`ExportJob::into_manifest`] to turn
/// it into an error. Fails with [`ExportError::DeadlineExceeded`] when the next
/// sleep would cross `max_wait`.
pub async fn wait_for_completion(
    poller: &ExportPoller,
    mut job: ExportJob,
    token: &AccessCredential,
    policy: &PollPolicy,
) -> Result<ExportJob, ExportError> {
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        let step = poller.poll_step(&job, token).await?;
        attempts += 1;

        if step.job.is_terminal() {
            tracing::info!(
                job = %step.job.polling_location(),
                state = %step.job.state(),
                attempts,
                "Export job reached terminal state"
            );
            return Ok(step.job);
        }

        let delay = policy.delay_after(&step);
        let waited = started.elapsed();
        if let Some(max_wait) = policy.max_wait {
            if waited + delay > max_wait {
                tracing::warn!(
                    job = %step.job.polling_location(),
                    attempts,
                    "Giving up on export job"
                );
                return Err(ExportError::DeadlineExceeded { waited });
            }
        }

        tracing::debug!(
            job = %step.job.polling_location(),
            progress = step.progress.as_deref().unwrap_or("-"),
            delay_ms = delay.as_millis() as u64,
            "Export job still running"
        );

        tokio::time::sleep(delay).await;
        job = step.job;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::JobState;
    use reqwest::header::HeaderMap;
    use reqwest::Client;
    use mockito::Server;

    fn token() -> AccessCredential {
        AccessCredential::new("abc", None)
    }

    fn step(retry_after: Option<Duration>) -> PollStep {
        PollStep {
            job: ExportJob::new("loc"),
            retry_after,
            progress: None,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_default_policy_ignores_retry_after() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(
            policy.delay_after(&step(Some(Duration::from_secs(60)))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_honor_retry_after() {
        let policy = PollPolicy {
            interval: Duration::from_secs(5),
            honor_retry_after: true,
            max_wait: None,
        };
        assert_eq!(
            policy.delay_after(&step(Some(Duration::from_secs(60)))),
            Duration::from_secs(60)
        );
        assert_eq!(policy.delay_after(&step(None)), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_for_completion() {
        let mut server = Server::new_async().await;
        let _done = server
            .mock("GET", "/jobs/1")
            .with_status(200)
            .with_body(r#"{"output":[{"type":"Patient","url":"f1.ndjson"}]}"#)
            .create_async()
            .await;

        let policy = PollPolicy {
            interval: Duration::from_millis(10),
            honor_retry_after: false,
            max_wait: Some(Duration::from_secs(5)),
        };
        let job = wait_for_completion(
            &ExportPoller::new(Client::new()),
            ExportJob::new(format!("{}/jobs/1", server.url())),
            &token(),
            &policy,
        )
        .await
        .unwrap();

        assert!(matches!(job.state(), JobState::Completed { .. }));
        assert_eq!(job.manifest().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_failed_job_as_value() {
        let mut server = Server::new_async().await;
        let _failed = server
            .mock("GET", "/jobs/2")
            .with_status(404)
            .with_body("job expired")
            .create_async()
            .await;

        let job = wait_for_completion(
            &ExportPoller::new(Client::new()),
            ExportJob::new(format!("{}/jobs/2", server.url())),
            &token(),
            &PollPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(job.failure().unwrap().status_code, 404);
        assert!(matches!(
            job.into_manifest(),
            Err(ExportError::PollFailed { status_code: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_deadline_exceeded() {
        let mut server = Server::new_async().await;
        let running = server
            .mock("GET", "/jobs/3")
            .with_status(202)
            .expect_at_least(1)
            .create_async()
            .await;

        let policy = PollPolicy {
            interval: Duration::from_millis(20),
            honor_retry_after: false,
            max_wait: Some(Duration::from_millis(50)),
        };
        let result = wait_for_completion(
            &ExportPoller::new(Client::new()),
            ExportJob::new(format!("{}/jobs/3", server.url())),
            &token(),
            &policy,
        )
        .await;

        assert!(matches!(result, Err(ExportError::DeadlineExceeded { .. })));
        running.assert_async().await;
    }
}
