use anyhow::{Context, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;
use crate::error::ApiError;

/// HTTP client for the Spotify Web API
///
/// Injects the bearer credential and self-heals on a single 401 by
/// refreshing the stored credential and retrying the request exactly once.
/// Retry-with-backoff is a separate policy (`retry::with_retry`) layered on
/// top by callers that want it.
pub struct SpotifyHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Credential manager
    auth_manager: Arc<AuthManager>,

    /// Spotify Web API base URL
    api_base: String,
}

impl SpotifyHttpClient {
    pub fn new(
        auth_manager: Arc<AuthManager>,
        api_base: String,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            auth_manager,
            api_base,
        })
    }

    /// Perform one bearer-authenticated call against the Spotify Web API.
    ///
    /// On a 401 the stored credential is refreshed once and the request
    /// retried with the new token; if there is nothing to refresh or the
    /// refresh fails, the original 401 response is returned unchanged.
    /// Every other status is returned as-is for the caller to interpret.
    ///
    /// Side effect: a read-like call can persist a refreshed credential.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ApiError> {
        let token = self
            .auth_manager
            .get_valid_access_token()
            .await
            .map_err(|e| {
                tracing::warn!("No access token for {} {}: {}", method, path, e);
                ApiError::NoAccessToken
            })?;

        let response = self.send(method.clone(), path, body, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // Reactive re-authentication: the upstream rejected a token the
        // expiry margin still considered valid. One refresh, one retry.
        tracing::warn!("Received 401 from Spotify, refreshing token and retrying once");
        match self.auth_manager.refresh_stored().await {
            Ok(renewed) => self.send(method, path, body, &renewed.access_token).await,
            Err(e) => {
                tracing::warn!("Reactive token refresh failed: {}", e);
                Ok(response)
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.api_base, path);

        tracing::debug!(method = %method, url = %url, "Sending Spotify API request");

        let mut request = self
            .client
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", token));

        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            ApiError::Internal(anyhow::Error::new(e).context(format!("Request to {} failed", url)))
        })
    }
}
