//! Outbound HTTP client construction.

use crate::config::HttpConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Build the client handed to the token exchanger, initiator and poller.
///
/// Idle connections are not pooled: no socket outlives the call that opened it.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout_seconds))
        .pool_max_idle_per_host(0)
        .build()
        .context("Failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_from_defaults() {
        assert!(build_client(&HttpConfig::default()).is_ok());
    }
}
