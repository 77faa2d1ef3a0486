// Configuration model and startup validation
pub mod config;

// Typed failures for authorization and export
pub mod error;

// Outbound HTTP client
pub mod http;

// SMART authorization: redirect, token exchange, anti-forgery state
pub mod oauth;

// Bulk export kick-off, polling state machine and cadence
pub mod export;

// Inbound bearer token extraction
pub mod auth;

// HTTP host surface
pub mod api;

pub use error::{AuthError, ExportError, TransportError};
pub use export::{ExportJob, JobState, ManifestEntry};
pub use oauth::{AccessCredential, AuthorizationRequest};
