use super::{ExportJob, FailureDetail, JobState, ManifestEntry};
use crate::error::ExportError;
use crate::oauth::AccessCredential;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Result of one status round-trip.
#[derive(Debug, Clone)]
pub struct PollStep {
    pub job: ExportJob,
    /// Provider's `Retry-After` hint, if any
    pub retry_after: Option<Duration>,
    /// Provider's `X-Progress` header, if any
    pub progress: Option<String>,
    /// Raw response headers (empty when no request was made)
    pub headers: HeaderMap,
}

/// Single-step status checks against a job's polling location.
///
/// Holds no timer or backoff; cadence belongs to the caller.
#[derive(Clone, Debug)]
pub struct ExportPoller {
    http_client: Client,
}

impl ExportPoller {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    /// Poll once and return the job's next state.
    pub async fn poll_once(
        &self,
        job: &ExportJob,
        token: &AccessCredential,
    ) -> Result<ExportJob, ExportError> {
        self.poll_step(job, token).await.map(|step| step.job)
    }

    /// Poll once, keeping the response metadata a caller needs for its cadence.
    ///
    /// Terminal jobs are returned unchanged without a request.
    pub async fn poll_step(
        &self,
        job: &ExportJob,
        token: &AccessCredential,
    ) -> Result<PollStep, ExportError> {
        if job.is_terminal() {
            return Ok(PollStep {
                job: job.clone(),
                retry_after: None,
                progress: None,
                headers: HeaderMap::new(),
            });
        }

        tracing::debug!(job = %job.polling_location(), "Polling export status");

        let response = self
            .http_client
            .get(job.polling_location())
            .header(AUTHORIZATION, token.bearer_header())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        let next = match status {
            StatusCode::ACCEPTED => JobState::InProgress,
            StatusCode::OK => {
                let manifest = parse_manifest(&body);
                tracing::info!(
                    job = %job.polling_location(),
                    files = manifest.len(),
                    "Export job completed"
                );
                JobState::Completed { manifest }
            }
            other => {
                tracing::warn!(
                    job = %job.polling_location(),
                    status = other.as_u16(),
                    "Export job failed"
                );
                JobState::Failed(FailureDetail {
                    status_code: other.as_u16(),
                    body,
                })
            }
        };

        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let progress = headers
            .get("x-progress")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(PollStep {
            job: job.advance(next),
            retry_after,
            progress,
            headers,
        })
    }
}

/// Read the `output` array of a completion body.
///
/// A missing or malformed `output` yields an empty manifest; entries lacking a
/// string `type` or `url` are skipped. Duplicates are kept.
fn parse_manifest(body: &str) -> Vec<ManifestEntry> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        tracing::warn!("Completion body is not JSON, manifest is empty");
        return Vec::new();
    };
    let Some(output) = value.get("output").and_then(Value::as_array) else {
        return Vec::new();
    };

    output
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let entry = manifest_entry(item);
            if entry.is_none() {
                tracing::debug!(
                    index,
                    entry = %item,
                    "Skipping manifest entry without string type/url"
                );
            }
            entry
        })
        .collect()
}

fn manifest_entry(item: &Value) -> Option<ManifestEntry> {
    let resource_type = item.get("type")?.as_str()?;
    let url = item.get("url")?.as_str()?;
    Some(ManifestEntry {
        resource_type: resource_type.to_string(),
        url: url.to_string(),
    })
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// Dates in the past give a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Server;

    fn token() -> AccessCredential {
        AccessCredential::new("abc", Some(3600))
    }

    #[test]
    fn test_parse_manifest() {
        let body = r#"{
            "transactionTime": "2026-01-01T00:00:00Z",
            "requiresAccessToken": true,
            "output": [
                {"type": "Patient", "url": "f1.ndjson", "count": 10},
                {"type": "Observation", "url": "f2.ndjson"},
                {"type": "Patient", "url": "f1.ndjson"}
            ],
            "error": []
        }"#;
        let manifest = parse_manifest(body);
        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest[0].resource_type, "Patient");
        assert_eq!(manifest[1].url, "f2.ndjson");
        assert_eq!(manifest[0], manifest[2]);
    }

    #[test]
    fn test_parse_manifest_lenient() {
        assert!(parse_manifest("").is_empty());
        assert!(parse_manifest("not json").is_empty());
        assert!(parse_manifest("{}").is_empty());
        assert!(parse_manifest(r#"{"output": "nope"}"#).is_empty());

        let manifest = parse_manifest(r#"{"output": [{"type": "Patient"}, {"type": "Encounter", "url": "e.ndjson"}, 7]}"#);
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].resource_type, "Encounter");
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct LogCapture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_parse_manifest_logs_skipped_entries() {
        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();

        let manifest = tracing::subscriber::with_default(subscriber, || {
            parse_manifest(
                r#"{"output": [{"type": "Patient", "url": 42}, {"type": "Encounter", "url": "e.ndjson"}]}"#,
            )
        });
        assert_eq!(manifest.len(), 1);

        let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let skipped: Vec<&str> = logs
            .lines()
            .filter(|line| line.contains("Skipping manifest entry"))
            .collect();
        assert_eq!(skipped.len(), 1, "logs were:\n{}", logs);
        assert!(skipped[0].contains("DEBUG"));
        assert!(skipped[0].contains("index=0"));
        assert!(skipped[0].contains(r#""url":42"#));
    }

    #[test]
    fn test_parse_retry_after() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 5 ", now), Some(Duration::from_secs(5)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[tokio::test]
    async fn test_poll_sequence_reaches_completed() {
        let mut server = Server::new_async().await;
        let location = format!("{}/jobs/1", server.url());
        let poller = ExportPoller::new(Client::new());

        let in_progress = server
            .mock("GET", "/jobs/1")
            .match_header("authorization", "Bearer abc")
            .match_header("accept", "application/json")
            .with_status(202)
            .with_header("x-progress", "50% complete")
            .with_header("retry-after", "10")
            .expect(2)
            .create_async()
            .await;

        let job = ExportJob::new(location.clone());

        let step = poller.poll_step(&job, &token()).await.unwrap();
        assert_eq!(step.job.state(), &JobState::InProgress);
        assert_eq!(step.progress.as_deref(), Some("50% complete"));
        assert_eq!(step.retry_after, Some(Duration::from_secs(10)));

        let job = poller.poll_once(&step.job, &token()).await.unwrap();
        assert_eq!(job.state(), &JobState::InProgress);
        in_progress.assert_async().await;
        in_progress.remove_async().await;

        let _done = server
            .mock("GET", "/jobs/1")
            .with_status(200)
            .with_body(r#"{"output":[{"type":"Patient","url":"f1.ndjson"}]}"#)
            .create_async()
            .await;

        let job = poller.poll_once(&job, &token()).await.unwrap();
        assert_eq!(job.polling_location(), location);
        assert_eq!(
            job.manifest().unwrap(),
            &[ManifestEntry {
                resource_type: "Patient".to_string(),
                url: "f1.ndjson".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_poll_failure_keeps_status_and_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/jobs/2")
            .with_status(500)
            .with_body(r#"{"resourceType":"OperationOutcome","issue":[]}"#)
            .create_async()
            .await;

        let poller = ExportPoller::new(Client::new());
        let job = poller
            .poll_once(&ExportJob::new(format!("{}/jobs/2", server.url())), &token())
            .await
            .unwrap();

        assert_eq!(
            job.failure(),
            Some(&FailureDetail {
                status_code: 500,
                body: r#"{"resourceType":"OperationOutcome","issue":[]}"#.to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_completed_without_output_is_empty_manifest() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/jobs/3")
            .with_status(200)
            .with_body(r#"{"transactionTime":"2026-01-01T00:00:00Z"}"#)
            .create_async()
            .await;

        let poller = ExportPoller::new(Client::new());
        let job = poller
            .poll_once(&ExportJob::new(format!("{}/jobs/3", server.url())), &token())
            .await
            .unwrap();

        assert_eq!(job.manifest(), Some(&[][..]));
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_polled() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/jobs/4")
            .with_status(200)
            .with_body(r#"{"output":[{"type":"Patient","url":"f1.ndjson"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let poller = ExportPoller::new(Client::new());
        let done = poller
            .poll_once(&ExportJob::new(format!("{}/jobs/4", server.url())), &token())
            .await
            .unwrap();
        let again = poller.poll_once(&done, &token()).await.unwrap();

        assert_eq!(again, done);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_repeated_terminal_polls_do_not_flap() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/jobs/5")
            .with_status(200)
            .with_body(r#"{"output":[{"type":"Patient","url":"f1.ndjson"}]}"#)
            .create_async()
            .await;

        // Fresh handles for the same location: the host lost its registry
        let poller = ExportPoller::new(Client::new());
        let location = format!("{}/jobs/5", server.url());
        let first = poller
            .poll_once(&ExportJob::new(location.clone()), &token())
            .await
            .unwrap();
        let second = poller
            .poll_once(&ExportJob::new(location), &token())
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_poll_transport_error() {
        let poller = ExportPoller::new(Client::new());
        let result = poller
            .poll_once(&ExportJob::new("http://127.0.0.1:9/jobs/1"), &token())
            .await;

        assert!(matches!(result, Err(ExportError::Transport(_))));
    }
}
