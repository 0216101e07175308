use axum::{
    extract::{Query, State},
    middleware as axum_middleware,
    response::{Html, Redirect},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::AuthManager;
use crate::config::Config;
use crate::error::ApiError;
use crate::http_client::SpotifyHttpClient;
use crate::middleware;
use crate::models::{self, DevicesResponse, TransferRequest};
use crate::retry;

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub proxy_api_key: String,
    pub auth_manager: Arc<AuthManager>,
    pub http_client: Arc<SpotifyHttpClient>,
    pub config: Arc<Config>,
    /// `state` parameter of the most recent /login redirect, awaiting the
    /// callback. Single-user gateway: one pending login at a time.
    pub pending_state: Arc<RwLock<Option<String>>>,
}

/// Health check routes (no authentication required)
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// OAuth login routes (no gateway key - the browser and Spotify's redirect
/// cannot carry it)
pub fn login_routes(state: AppState) -> Router {
    Router::new()
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        .with_state(state)
}

/// Playback routes (require the gateway API key)
pub fn player_routes(state: AppState) -> Router {
    Router::new()
        .route("/devices", get(devices_handler))
        .route("/transfer", post(transfer_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}

/// GET / - Simple health check
///
/// This endpoint does not require authentication.
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Spotify Gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// GET /login - Begin the OAuth authorization-code flow
///
/// Redirects the browser to Spotify's authorize page and remembers the
/// `state` parameter for the callback to check.
async fn login_handler(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let csrf_state = Uuid::new_v4().to_string();
    let url = state.auth_manager.authorize_url(&csrf_state)?;

    *state.pending_state.write().await = Some(csrf_state);

    tracing::info!("Redirecting to Spotify authorize page");
    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /callback - OAuth redirect target
///
/// Validates the `state` parameter, exchanges the authorization code for
/// the first credential, and persists it.
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<&'static str>, ApiError> {
    if let Some(error) = params.error {
        tracing::warn!("Authorization denied by Spotify: {}", error);
        return Err(ApiError::UpstreamError {
            status: 400,
            message: format!("Authorization was not granted: {}", error),
        });
    }

    let expected = state.pending_state.write().await.take();
    if expected.is_none() || params.state != expected {
        return Err(ApiError::MalformedRequest(
            "state parameter missing or does not match the pending login".to_string(),
        ));
    }

    let code = params
        .code
        .ok_or_else(|| ApiError::MalformedRequest("code parameter is required".to_string()))?;

    state.auth_manager.exchange_authorization_code(&code).await?;

    Ok(Html(
        "<html><body><h1>Connected</h1>\
         <p>Spotify account linked. You can close this tab.</p></body></html>",
    ))
}

/// GET /devices - List playback devices
async fn devices_handler(State(state): State<AppState>) -> Result<Json<DevicesResponse>, ApiError> {
    tracing::info!("Request to /devices");

    require_session(&state).await?;

    let response = state
        .http_client
        .call(Method::GET, "/v1/me/player/devices", None)
        .await?;

    if !response.status().is_success() {
        return Err(reject_upstream(response).await);
    }

    let devices: DevicesResponse = response
        .json()
        .await
        .map_err(|e| anyhow::Error::new(e).context("Failed to parse devices response"))?;

    Ok(Json(devices))
}

/// What a transfer request asks playback to move to
enum TransferTarget {
    Id(String),
    Name(String),
}

/// POST /transfer - Transfer playback to a device
///
/// Accepts `device_id` or `device_name` (case-insensitive substring, the
/// "find my Echo" path); an empty body falls back to the configured default
/// device query. The upstream PUT runs under the bounded retry policy to
/// absorb momentary device-state mismatches and rate limiting.
async fn transfer_handler(
    State(state): State<AppState>,
    body: Option<Json<TransferRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    tracing::info!(
        "Request to /transfer: device_id={:?}, device_name={:?}",
        request.device_id,
        request.device_name
    );

    // Shape validation happens before any network call
    let target = if let Some(id) = request.device_id.clone() {
        TransferTarget::Id(id)
    } else if let Some(name) = request
        .device_name
        .clone()
        .or_else(|| state.config.default_device.clone())
    {
        TransferTarget::Name(name)
    } else {
        return Err(ApiError::MalformedRequest(
            "device_id or device_name is required".to_string(),
        ));
    };

    require_session(&state).await?;

    let (device_id, device_label) = match target {
        TransferTarget::Id(id) => (id.clone(), id),
        TransferTarget::Name(query) => resolve_device_by_name(&state, &query).await?,
    };

    let play = request.play.unwrap_or(true);
    let payload = json!({ "device_ids": [device_id], "play": play });

    let client = state.http_client.clone();
    let response = retry::with_retry(|| {
        let client = client.clone();
        let payload = payload.clone();
        async move { client.call(Method::PUT, "/v1/me/player", Some(&payload)).await }
    })
    .await?;

    if !response.status().is_success() {
        return Err(reject_upstream(response).await);
    }

    tracing::info!("Playback transferred to {}", device_label);
    Ok(Json(json!({ "status": "ok", "device": device_label })))
}

/// Gate a handler on a usable session before doing anything else,
/// distinguishing never-logged-in from refresh-rejected.
async fn require_session(state: &AppState) -> Result<(), ApiError> {
    state
        .auth_manager
        .get_valid_access_token()
        .await
        .map(|_| ())
        .map_err(ApiError::from)
}

/// Look up a device id by name through the devices endpoint
async fn resolve_device_by_name(
    state: &AppState,
    query: &str,
) -> Result<(String, String), ApiError> {
    let response = state
        .http_client
        .call(Method::GET, "/v1/me/player/devices", None)
        .await?;

    if !response.status().is_success() {
        return Err(reject_upstream(response).await);
    }

    let devices: DevicesResponse = response
        .json()
        .await
        .map_err(|e| anyhow::Error::new(e).context("Failed to parse devices response"))?;

    let device = models::find_device(&devices.devices, query).ok_or_else(|| {
        ApiError::UpstreamError {
            status: 404,
            message: format!("No device matching '{}'", query),
        }
    })?;

    let id = device.id.clone().ok_or_else(|| ApiError::UpstreamError {
        status: 404,
        message: format!("Device '{}' has no id and cannot be targeted", device.name),
    })?;

    Ok((id, device.name.clone()))
}

/// Map an upstream non-success response into the error taxonomy
async fn reject_upstream(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = models::upstream_message(&body)
        .unwrap_or_else(|| format!("Spotify returned {}", status));

    match status.as_u16() {
        401 => ApiError::UpstreamAuthExpired,
        403 => ApiError::FeatureGated(message),
        s if retry::is_retryable(status) => ApiError::UpstreamTransient { status: s, message },
        s => ApiError::UpstreamError { status: s, message },
    }
}
