// Token endpoint calls
// Form-encoded POSTs against the Spotify accounts service

use anyhow::{Context, Result};
use reqwest::Client;

use super::types::TokenResponse;
use crate::config::SpotifyConfig;

/// Exchange a refresh token for a new access token.
///
/// `grant_type=refresh_token` with Basic auth built from the client
/// id/secret. Spotify may or may not rotate the refresh token; the caller
/// decides how to merge the response into the stored record.
pub async fn refresh_access_token(
    client: &Client,
    spotify: &SpotifyConfig,
    refresh_token: &str,
) -> Result<TokenResponse> {
    tracing::debug!("Refreshing access token via {}", spotify.token_url);

    if spotify.client_id.is_empty() || spotify.client_secret.is_empty() {
        anyhow::bail!("Spotify client id/secret not configured");
    }

    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];

    let response = client
        .post(&spotify.token_url)
        .basic_auth(&spotify.client_id, Some(&spotify.client_secret))
        .form(&form)
        .send()
        .await
        .context("Failed to send token refresh request")?;

    parse_token_response(response).await
}

/// One-time exchange of an authorization code for the first token pair.
///
/// `grant_type=authorization_code`; the redirect URI must match the one the
/// authorize request was issued with.
pub async fn exchange_code(
    client: &Client,
    spotify: &SpotifyConfig,
    code: &str,
) -> Result<TokenResponse> {
    tracing::debug!("Exchanging authorization code via {}", spotify.token_url);

    if spotify.client_id.is_empty() || spotify.client_secret.is_empty() {
        anyhow::bail!("Spotify client id/secret not configured");
    }

    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", spotify.redirect_uri.as_str()),
    ];

    let response = client
        .post(&spotify.token_url)
        .basic_auth(&spotify.client_id, Some(&spotify.client_secret))
        .form(&form)
        .send()
        .await
        .context("Failed to send code exchange request")?;

    parse_token_response(response).await
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Token endpoint returned {}: {}", status, error_text);
    }

    let data: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token endpoint response")?;

    if data.access_token.is_empty() {
        anyhow::bail!("Token endpoint response does not contain access_token");
    }

    Ok(data)
}
