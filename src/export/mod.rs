//! Bulk Data Export job orchestration.
//!
//! # Lifecycle
//!
//! ```text
//!   start_export ──202 + Content-Location──▶ Pending
//!                                              │
//!                        poll: 202 ────────────┤
//!                                              ▼
//!                                          InProgress ◀──┐ poll: 202
//!                                              │─────────┘
//!                  poll: 200 ┌─────────────────┴──────────────┐ poll: other
//!                            ▼                                ▼
//!                        Completed                          Failed
//!                   (manifest of outputs)           (status code + body)
//! ```
//!
//! The provider keeps the job; this module only carries its handle. Each poll
//! takes the job and credential as input and returns the next job value, so
//! nothing here needs locking. Callers serialize polls for one handle and pick
//! their own cadence ([`watcher`] offers a default one).

mod kickoff;
mod poller;
pub mod registry;
pub mod watcher;

pub use kickoff::ExportInitiator;
pub use poller::{parse_retry_after, ExportPoller, PollStep};
pub use registry::{run_job_cleanup, JobRegistry, TrackedJob};
pub use watcher::{wait_for_completion, PollPolicy};

use crate::error::ExportError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One output file reference from a completed export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub url: String,
}

/// What the provider said when the job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub status_code: u16,
    pub body: String,
}

/// Job state. Manifest and failure detail only exist in their terminal states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InProgress,
    Completed { manifest: Vec<ManifestEntry> },
    Failed(FailureDetail),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed(_))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "Pending"),
            JobState::InProgress => write!(f, "In Progress"),
            JobState::Completed { .. } => write!(f, "Completed"),
            JobState::Failed(_) => write!(f, "Failed"),
        }
    }
}

/// Handle to one in-flight bulk export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    polling_location: String,
    #[serde(flatten)]
    state: JobState,
}

impl ExportJob {
    /// A freshly accepted job, or a handle resumed from a known polling location.
    pub fn new(polling_location: impl Into<String>) -> Self {
        Self {
            polling_location: polling_location.into(),
            state: JobState::Pending,
        }
    }

    pub fn polling_location(&self) -> &str {
        &self.polling_location
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn manifest(&self) -> Option<&[ManifestEntry]> {
        match &self.state {
            JobState::Completed { manifest } => Some(manifest),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureDetail> {
        match &self.state {
            JobState::Failed(detail) => Some(detail),
            _ => None,
        }
    }

    /// Treat a failed job as an error.
    ///
    /// `Ok(None)` while the job is still running.
    pub fn into_manifest(self) -> Result<Option<Vec<ManifestEntry>>, ExportError> {
        match self.state {
            JobState::Completed { manifest } => Ok(Some(manifest)),
            JobState::Failed(FailureDetail { status_code, body }) => {
                Err(ExportError::PollFailed { status_code, body })
            }
            JobState::Pending | JobState::InProgress => Ok(None),
        }
    }

    /// Next job value for the same handle. Terminal jobs never change.
    fn advance(&self, next: JobState) -> Self {
        if self.is_terminal() {
            return self.clone();
        }
        Self {
            polling_location: self.polling_location.clone(),
            state: next,
        }
    }
}
