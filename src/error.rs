// Error handling module
// Defines the error taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API errors that can occur during request processing
///
/// Every variant carries a stable wire code so that clients (the phone
/// shortcut) can branch on `error.type` without parsing messages.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Nothing was ever stored; the user must complete the login flow
    #[error("Not connected to Spotify - visit /login to authenticate")]
    NoCredential,

    /// The stored refresh token was rejected or the token endpoint was
    /// unreachable; the user must re-login
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// No token could be obtained before attempting an upstream call
    #[error("No access token available")]
    NoAccessToken,

    /// A 401 was observed and the single re-authentication retry also
    /// failed or had nothing to retry with
    #[error("Spotify session expired - re-authentication required")]
    UpstreamAuthExpired,

    /// Spotify returned 403 (Premium-only feature); reported verbatim
    #[error("Feature not available on this Spotify plan: {0}")]
    FeatureGated(String),

    /// Transient upstream failure that survived the retry budget
    #[error("Spotify API transient error: {status} - {message}")]
    UpstreamTransient { status: u16, message: String },

    /// Any other non-success status from the Spotify API
    #[error("Spotify API error: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    /// Caller-supplied input failed shape validation
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Gateway API key missing or invalid (the gateway's own door, not
    /// Spotify's)
    #[error("Invalid or missing API key")]
    Unauthorized,

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Stable wire code for the `error.type` field
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoCredential => "no_credential",
            ApiError::RefreshFailed(_) => "refresh_failed",
            ApiError::NoAccessToken => "no_access_token",
            ApiError::UpstreamAuthExpired => "upstream_auth_expired",
            ApiError::FeatureGated(_) => "feature_gated",
            ApiError::UpstreamTransient { .. } => "upstream_transient",
            ApiError::UpstreamError { .. } => "upstream_error",
            ApiError::MalformedRequest(_) => "malformed_request",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match self {
            ApiError::NoCredential
            | ApiError::RefreshFailed(_)
            | ApiError::NoAccessToken
            | ApiError::UpstreamAuthExpired => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::FeatureGated(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::UpstreamTransient { status, message }
            | ApiError::UpstreamError { status, message } => {
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status_code, message)
            }
            ApiError::MalformedRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Internal(err) => {
                // Log internal errors
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": code,
            }
        }));

        (status, body).into_response()
    }
}

impl From<crate::auth::TokenError> for ApiError {
    fn from(e: crate::auth::TokenError) -> Self {
        match e {
            crate::auth::TokenError::NoCredential => ApiError::NoCredential,
            crate::auth::TokenError::RefreshFailed(source) => {
                ApiError::RefreshFailed(source.to_string())
            }
        }
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
