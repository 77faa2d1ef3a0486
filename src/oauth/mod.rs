//! SMART-on-FHIR authorization code flow.
//!
//! Implements the upstream half of a bulk export session:
//! 1. Build the provider authorization URL ([`AuthorizationRequest`])
//! 2. User authorizes on the provider's site
//! 3. Provider redirects back with `code` and `state`
//! 4. Exchange the code for a bearer credential ([`TokenExchanger`])
//!
//! The resulting [`AccessCredential`] is handed to the export initiator and
//! poller. It is never cached, refreshed or persisted here.

mod exchange;
mod state_manager;

pub use exchange::TokenExchanger;
pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use crate::config::SmartBulkConfig;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// One authorization launch. Built per request, consumed to build a URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    /// Opaque anti-forgery token echoed back on the callback
    pub state: String,
    /// Requested capabilities, e.g. `system/Patient.read`, in fixed order
    pub scopes: Vec<String>,
}

impl AuthorizationRequest {
    /// Build a request from configuration. Generates a UUID v4 state when none is supplied.
    pub fn from_config(config: &SmartBulkConfig, state: Option<String>) -> Self {
        Self {
            client_id: config.smart.client_id.clone(),
            redirect_uri: config.smart.redirect_uri.clone(),
            state: state.unwrap_or_else(|| Uuid::new_v4().to_string()),
            scopes: config.effective_scopes(),
        }
    }

    /// Build the provider authorization URL.
    ///
    /// Scopes are joined by a single space in the order given; every value is
    /// percent-encoded.
    pub fn build_redirect_url(&self, authorize_url: &str) -> String {
        let scope = self.scopes.join(" ");
        let separator = if authorize_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&state={}&scope={}",
            authorize_url,
            separator,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.state),
            urlencoding::encode(&scope)
        )
    }
}

/// Bearer credential returned by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential {
    pub token: String,
    /// Advisory lifetime in seconds; not enforced here
    pub expires_in: Option<u64>,
}

impl AccessCredential {
    pub fn new(token: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            token: token.into(),
            expires_in,
        }
    }

    /// Value for the `Authorization` header
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Hex SHA-256 of the token. Identifies the holder without keeping the
    /// token itself.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.token.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}
