use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Complete smart-bulk configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmartBulkConfig {
    #[serde(default)]
    pub smart: SmartConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// SMART-on-FHIR client registration and authorization endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmartConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub authorize_url: String,
    #[serde(default)]
    pub token_url: String,
    /// Requested scopes, in order. Empty = `system/<Type>.read` per export type.
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Bulk export kick-off endpoint and requested resource types
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_resource_types")]
    pub resource_types: Vec<String>,
}

fn default_resource_types() -> Vec<String> {
    [
        "Patient",
        "Observation",
        "MedicationRequest",
        "AllergyIntolerance",
        "Encounter",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            resource_types: default_resource_types(),
        }
    }
}

/// Outbound HTTP client settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("smart-bulk/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Caller-side polling cadence for export jobs
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,
    /// Sleep for the provider's Retry-After hint instead of the fixed interval
    #[serde(default)]
    pub honor_retry_after: bool,
    /// Give up waiting after this many seconds (None = wait forever)
    #[serde(default)]
    pub max_wait_seconds: Option<u64>,
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_poll_interval(),
            honor_retry_after: false,
            max_wait_seconds: None,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_seconds.map(Duration::from_secs)
    }
}

/// Inbound HTTP host settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// How long an anti-forgery state stays valid
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
    /// How long a job record is kept after its last update
    #[serde(default = "default_job_retention")]
    pub job_retention_seconds: i64,
    #[serde(default = "default_job_cleanup_interval")]
    pub job_cleanup_interval_seconds: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_state_expiry() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

fn default_job_retention() -> i64 {
    3600
}

fn default_job_cleanup_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            state_expiry_seconds: default_state_expiry(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
            job_retention_seconds: default_job_retention(),
            job_cleanup_interval_seconds: default_job_cleanup_interval(),
        }
    }
}

/// Configuration problems detected at startup
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{field} is not an absolute http(s) URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("export.resource_types must list at least one resource type")]
    NoResourceTypes,
}

impl SmartBulkConfig {
    /// Scopes sent in the authorization request, in order.
    pub fn effective_scopes(&self) -> Vec<String> {
        if !self.smart.scopes.is_empty() {
            return self.smart.scopes.clone();
        }
        self.export
            .resource_types
            .iter()
            .map(|t| format!("system/{}.read", t))
            .collect()
    }

    /// Apply `SMART_BULK_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup, falling back to current values.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SMART_BULK_CLIENT_ID") {
            self.smart.client_id = v;
        }
        if let Some(v) = lookup("SMART_BULK_REDIRECT_URI") {
            self.smart.redirect_uri = v;
        }
        if let Some(v) = lookup("SMART_BULK_AUTHORIZE_URL") {
            self.smart.authorize_url = v;
        }
        if let Some(v) = lookup("SMART_BULK_TOKEN_URL") {
            self.smart.token_url = v;
        }
        if let Some(v) = lookup("SMART_BULK_SCOPES") {
            self.smart.scopes = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = lookup("SMART_BULK_EXPORT_URL") {
            self.export.endpoint = v;
        }
        if let Some(v) = lookup("SMART_BULK_RESOURCE_TYPES") {
            self.export.resource_types = split_csv(&v);
        }
        if let Some(v) = lookup("SMART_BULK_BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(n) = lookup("SMART_BULK_POLL_INTERVAL_SECONDS").and_then(|v| v.parse().ok()) {
            self.polling.interval_seconds = n;
        }
        if let Some(b) = lookup("SMART_BULK_HONOR_RETRY_AFTER").and_then(|v| v.parse().ok()) {
            self.polling.honor_retry_after = b;
        }
        if let Some(n) = lookup("SMART_BULK_REQUEST_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            self.http.request_timeout_seconds = n;
        }
    }

    /// Reject configurations that could only fail later at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("smart.client_id", &self.smart.client_id)?;
        require("smart.redirect_uri", &self.smart.redirect_uri)?;
        require("smart.authorize_url", &self.smart.authorize_url)?;
        require("smart.token_url", &self.smart.token_url)?;
        require("export.endpoint", &self.export.endpoint)?;

        require_url("smart.redirect_uri", &self.smart.redirect_uri)?;
        require_url("smart.authorize_url", &self.smart.authorize_url)?;
        require_url("smart.token_url", &self.smart.token_url)?;
        require_url("export.endpoint", &self.export.endpoint)?;

        if self.export.resource_types.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::NoResourceTypes);
        }
        Ok(())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    Ok(())
}

fn require_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}

/// Split a comma-separated list, dropping blanks. Order and duplicates are kept.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SmartBulkConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: SmartBulkConfig = toml::from_str(&contents)?;
    Ok(config)
}
