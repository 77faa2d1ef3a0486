//! Anti-forgery state management for the authorization callback.
//!
//! Each launch gets a single-use state token; the callback must present it
//! before any code is exchanged.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Pending launch tracked by its state token
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// State token store with automatic expiration
#[derive(Clone)]
pub struct StateManager {
    states: Arc<DashMap<String, StateEntry>>,
    expiry_duration: Duration,
}

impl StateManager {
    /// Create a new state manager
    ///
    /// # Arguments
    /// * `expiry_seconds` - How long states remain valid (default: 600 = 10 minutes)
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    /// Generate a new state token (UUID v4) and remember the scopes it was issued for
    pub fn create_state(&self, scopes: &[String]) -> String {
        let state = Uuid::new_v4().to_string();
        self.states.insert(
            state.clone(),
            StateEntry {
                scopes: scopes.to_vec(),
                created_at: Utc::now(),
            },
        );
        state
    }

    /// Validate and consume a state token
    ///
    /// Returns the entry if known and not expired. The state is removed either way.
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let (_, entry) = self.states.remove(state)?;

        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }

        Some(entry)
    }

    /// Clean up expired states (should be called periodically)
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.states
            .retain(|_, entry| now - entry.created_at <= self.expiry_duration);
    }

    /// Number of outstanding states
    pub fn count(&self) -> usize {
        self.states.len()
    }
}

/// Background task to periodically clean up expired states
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!("OAuth state cleanup complete, {} states remaining", manager.count());
    }
}
