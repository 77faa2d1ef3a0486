use super::ExportJob;
use crate::config::SmartBulkConfig;
use crate::error::ExportError;
use crate::oauth::AccessCredential;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LOCATION};
use reqwest::{Client, StatusCode, Url};

/// Issues the bulk export kick-off request.
#[derive(Clone, Debug)]
pub struct ExportInitiator {
    http_client: Client,
    endpoint: String,
}

impl ExportInitiator {
    pub fn new(http_client: Client, config: &SmartBulkConfig) -> Self {
        Self {
            http_client,
            endpoint: config.export.endpoint.clone(),
        }
    }

    /// Start an asynchronous export of `resource_types`.
    ///
    /// The list is sent as `_type`, comma-joined, order and duplicates kept.
    /// Never retried: a second kick-off may spawn a duplicate job upstream.
    pub async fn start_export(
        &self,
        token: &AccessCredential,
        resource_types: &[String],
    ) -> Result<ExportJob, ExportError> {
        let mut request = self
            .http_client
            .get(&self.endpoint)
            .header(AUTHORIZATION, token.bearer_header())
            .header(ACCEPT, "application/fhir+json")
            .header("Prefer", "respond-async");

        if !resource_types.is_empty() {
            request = request.query(&[("_type", resource_types.join(","))]);
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            types = resource_types.len(),
            "Sending export kick-off"
        );

        let response = request.send().await?;
        let status = response.status();

        if status != StatusCode::ACCEPTED {
            let body = response.text().await?;
            tracing::warn!(status = status.as_u16(), "Export kick-off rejected");
            return Err(ExportError::KickoffRejected {
                status_code: status.as_u16(),
                body,
            });
        }

        let location = response
            .headers()
            .get(CONTENT_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ExportError::MissingPollingLocation)?;

        let polling_location = resolve_location(response.url(), location);

        tracing::info!(job = %polling_location, "Export job accepted");

        Ok(ExportJob::new(polling_location))
    }
}

/// Absolute locations are kept verbatim; relative ones resolve against the kick-off URL.
fn resolve_location(request_url: &Url, location: &str) -> String {
    if Url::parse(location).is_ok() {
        return location.to_string();
    }
    request_url
        .join(location)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_string())
}
