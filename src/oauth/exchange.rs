//! OAuth token exchange logic.
//!
//! Handles exchanging authorization codes for access tokens.

use super::AccessCredential;
use crate::config::SmartBulkConfig;
use crate::error::AuthError;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

/// OAuth token response. Every field is optional: providers are not trusted
/// to send a complete body.
#[derive(Deserialize, Debug, Default)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
}

impl TokenResponse {
    /// Accepts `3600` and `"3600"`; anything else is treated as absent.
    fn expires_in_seconds(&self) -> Option<u64> {
        match self.expires_in.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Performs the one-shot authorization-code → access-token exchange.
#[derive(Clone, Debug)]
pub struct TokenExchanger {
    http_client: Client,
    token_url: String,
    client_id: String,
    redirect_uri: String,
}

impl TokenExchanger {
    pub fn new(http_client: Client, config: &SmartBulkConfig) -> Self {
        Self {
            http_client,
            token_url: config.smart.token_url.clone(),
            client_id: config.smart.client_id.clone(),
            redirect_uri: config.smart.redirect_uri.clone(),
        }
    }

    /// Exchange an authorization code for a bearer credential.
    ///
    /// # Returns
    /// * `Ok(AccessCredential)` - upstream answered 200 with an `access_token`
    /// * `Err(AuthError::MissingCode)` - `code` is empty; nothing is sent
    /// * `Err(AuthError::UpstreamRejected)` - any non-200, body kept verbatim
    /// * `Err(AuthError::MissingAccessToken)` - 200 without a usable token
    /// * `Err(AuthError::Transport)` - no HTTP response was received
    pub async fn exchange_code(&self, code: &str) -> Result<AccessCredential, AuthError> {
        if code.is_empty() {
            return Err(AuthError::MissingCode);
        }

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
        ];

        tracing::debug!("Exchanging authorization code for token at {}", self.token_url);

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "Token endpoint rejected exchange");
            return Err(AuthError::UpstreamRejected {
                status_code: status.as_u16(),
                body,
            });
        }

        let token_response: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| AuthError::InvalidTokenResponse { body: body.clone() })?;

        let expires_in = token_response.expires_in_seconds();
        let token = token_response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MissingAccessToken {
                body: body.clone(),
                expires_in,
            })?;

        tracing::debug!(expires_in = ?expires_in, "Token exchange successful");

        Ok(AccessCredential { token, expires_in })
    }
}
