//! Error taxonomy for the authorization and bulk export clients.
//!
//! Every upstream rejection keeps the provider's status code and raw body so a
//! caller can reconstruct what the server actually said. Transport failures
//! (timeouts, refused connections) are kept apart from rejections because they
//! call for a different retry strategy.

use std::time::Duration;
use thiserror::Error;

/// Network-level failure: the request never produced an HTTP response.
#[derive(Debug, Clone, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
    /// The request timed out.
    pub timeout: bool,
    /// The connection could not be established.
    pub connect: bool,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            timeout: err.is_timeout(),
            connect: err.is_connect(),
            message: err.to_string(),
        }
    }
}

/// Token exchange failures.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No authorization code was supplied. Raised before any network call.
    #[error("authorization code not provided")]
    MissingCode,

    /// Token endpoint answered with anything other than 200.
    #[error("token endpoint rejected exchange with status {status_code}: {body}")]
    UpstreamRejected { status_code: u16, body: String },

    /// 200 response whose JSON body carries no `access_token`. Any
    /// `expires_in` the provider did send is kept.
    #[error("token response did not contain an access_token: {body}")]
    MissingAccessToken {
        body: String,
        expires_in: Option<u64>,
    },

    /// 200 response whose body is not a JSON object.
    #[error("token response is not valid JSON: {body}")]
    InvalidTokenResponse { body: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Bulk export kick-off and polling failures.
#[derive(Debug, Clone, Error)]
pub enum ExportError {
    /// Kick-off returned 202 without a `Content-Location` header.
    #[error("export kick-off accepted without a Content-Location header")]
    MissingPollingLocation,

    /// Kick-off returned a status other than 202.
    #[error("export kick-off rejected with status {status_code}: {body}")]
    KickoffRejected { status_code: u16, body: String },

    /// The job reached the `Failed` state and the caller asked for an error.
    #[error("export job failed with status {status_code}: {body}")]
    PollFailed { status_code: u16, body: String },

    /// The polling watcher gave up before the job reached a terminal state.
    #[error("export job did not finish within {waited:?}")]
    DeadlineExceeded { waited: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Transport(err.into())
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(err: reqwest::Error) -> Self {
        ExportError::Transport(err.into())
    }
}
