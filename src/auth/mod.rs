//! Inbound credential extraction for the export endpoints.
//!
//! Export routes accept the provider access token either as an
//! `Authorization: Bearer` header or, for browser-driven flows, a `token`
//! query parameter. The header wins when both are present.

use crate::oauth::AccessCredential;
use axum::http::HeaderMap;


/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Resolve the caller's provider credential from the header or the query fallback.
pub fn resolve_credential(
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<AccessCredential, TokenError> {
    match extract_bearer_token(headers) {
        Ok(token) => Ok(AccessCredential::new(token, None)),
        Err(TokenError::Missing) => {
            let token = query_token.ok_or(TokenError::Missing)?.trim();
            if token.is_empty() {
                return Err(TokenError::Empty);
            }
            Ok(AccessCredential::new(token, None))
        }
        Err(e) => Err(e),
    }
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum TokenError {
    /// Neither header nor query token present
    #[error("Authorization token not provided")]
    Missing,
    /// Not "Bearer <token>"
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
}
