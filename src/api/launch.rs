use super::{AppError, AppState};
use crate::error::AuthError;
use crate::oauth::AuthorizationRequest;
use axum::{
    extract::{Query, State},
    response::{Json, Redirect},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Authorization callback query parameters
#[derive(Deserialize)]
pub struct AuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Token handed back to the caller of the callback. `access_token` is null
/// when the provider answered 200 without one.
#[derive(Serialize)]
pub struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// GET /
///
/// Redirects the user agent to the provider's authorization page with a fresh
/// single-use anti-forgery state.
pub(super) async fn launch_auth(State(state): State<Arc<AppState>>) -> Redirect {
    let scopes = state.config.effective_scopes();
    let csrf_state = state.state_manager.create_state(&scopes);

    let request = AuthorizationRequest::from_config(&state.config, Some(csrf_state));
    let url = request.build_redirect_url(&state.config.smart.authorize_url);

    info!(scopes = scopes.len(), "Redirecting to authorization endpoint");

    Redirect::temporary(&url)
}

/// GET /callback
///
/// Validates the returned state and exchanges the authorization code.
pub(super) async fn handle_callback(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<AuthCallback>,
) -> Result<Json<TokenResponse>, AppError> {
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Authorization failed at provider");
        return Err(AppError::BadRequest(format!(
            "Authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback.code.unwrap_or_default();
    if code.is_empty() {
        return Err(AuthError::MissingCode.into());
    }

    let csrf_state = callback
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    let entry = state
        .state_manager
        .validate_and_consume(&csrf_state)
        .ok_or_else(|| {
            warn!("Unknown or expired authorization state");
            AppError::Unauthorized("Invalid or expired authorization state".to_string())
        })?;

    debug!(scopes = entry.scopes.len(), "Authorization state validated");

    let credential = match state.exchanger.exchange_code(&code).await {
        Ok(credential) => credential,
        Err(AuthError::MissingAccessToken { expires_in, .. }) => {
            warn!("Token endpoint answered 200 without an access_token");
            return Ok(Json(TokenResponse {
                access_token: None,
                expires_in,
            }));
        }
        Err(e) => return Err(e.into()),
    };

    info!(expires_in = ?credential.expires_in, "Authorization code exchanged");

    Ok(Json(TokenResponse {
        access_token: Some(credential.token),
        expires_in: credential.expires_in,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_deserialization() {
        let callback: AuthCallback =
            serde_urlencoded::from_str("code=auth_code_123&state=csrf_state_456").unwrap();
        assert_eq!(callback.code, Some("auth_code_123".to_string()));
        assert_eq!(callback.state, Some("csrf_state_456".to_string()));
        assert_eq!(callback.error, None);

        let callback: AuthCallback =
            serde_urlencoded::from_str("error=access_denied&error_description=User+cancelled")
                .unwrap();
        assert_eq!(callback.error, Some("access_denied".to_string()));
        assert_eq!(callback.error_description, Some("User cancelled".to_string()));
        assert_eq!(callback.code, None);
    }

    #[test]
    fn test_token_response_serialization() {
        let json = serde_json::to_string(&TokenResponse {
            access_token: Some("abc".to_string()),
            expires_in: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"access_token":"abc","expires_in":null}"#);

        let json = serde_json::to_string(&TokenResponse {
            access_token: None,
            expires_in: Some(3600),
        })
        .unwrap();
        assert_eq!(json, r#"{"access_token":null,"expires_in":3600}"#);
    }
}
