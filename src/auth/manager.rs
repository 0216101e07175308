use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;

use super::refresh;
use super::types::{Credential, TokenError, TokenResponse, DEFAULT_EXPIRES_IN_SECS};
use crate::config::SpotifyConfig;
use crate::store::CredentialStore;

/// Credential manager
///
/// Owns the refresh state machine for the single connected account. Holds
/// no cached copy of the credential: every call re-reads the store, so the
/// store stays the single source of truth and concurrent refreshes resolve
/// as last-writer-wins.
pub struct AuthManager {
    /// Durable credential storage, injected
    store: Arc<dyn CredentialStore>,

    /// Client id/secret, redirect URI, and endpoint URLs, injected
    spotify: SpotifyConfig,

    /// HTTP client for token endpoint requests
    client: Client,
}

impl AuthManager {
    pub fn new(store: Arc<dyn CredentialStore>, spotify: SpotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            store,
            spotify,
            client,
        })
    }

    /// Get a currently-usable access token, refreshing transparently.
    ///
    /// A stored token with fewer than 60 seconds of validity remaining is
    /// treated as expired and refreshed before being returned. On refresh
    /// failure nothing is persisted - the stored record is left untouched so
    /// the next call retries from the same stale state.
    pub async fn get_valid_access_token(&self) -> Result<String, TokenError> {
        let credential = self.store.get().ok_or(TokenError::NoCredential)?;

        let now = Utc::now().timestamp();
        if credential.is_fresh(now) {
            return Ok(credential.access_token);
        }

        tracing::debug!("Stored access token within expiry margin, refreshing");
        let response =
            refresh::refresh_access_token(&self.client, &self.spotify, &credential.refresh_token)
                .await
                .map_err(TokenError::RefreshFailed)?;

        let renewed = merge_refreshed(&credential, response, now);
        self.store
            .put(&renewed)
            .map_err(TokenError::RefreshFailed)?;

        tracing::info!("Access token refreshed, expires_at={}", renewed.expires_at);
        Ok(renewed.access_token)
    }

    /// One-time code-for-token exchange for the login callback.
    ///
    /// Does not read or merge with any prior stored credential - there is no
    /// previous session to fall back to, so failures propagate loudly.
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<Credential> {
        let response = refresh::exchange_code(&self.client, &self.spotify, code).await?;

        let refresh_token = response
            .refresh_token
            .context("Code exchange response did not include a refresh token")?;

        let credential = Credential {
            access_token: response.access_token,
            refresh_token,
            expires_at: Utc::now().timestamp()
                + response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        };

        self.store.put(&credential)?;
        tracing::info!("Authorization code exchanged, account connected");
        Ok(credential)
    }

    /// Unconditional refresh from the stored record, used by the reactive
    /// 401 path in the HTTP client.
    ///
    /// Deliberately bypasses the freshness check: a 401 means the upstream
    /// rejected a token the expiry margin still considered valid (revoked
    /// early), so freshness is no longer trustworthy.
    pub async fn refresh_stored(&self) -> Result<Credential> {
        let credential = self
            .store
            .get()
            .context("No credential stored to refresh")?;

        let now = Utc::now().timestamp();
        let response =
            refresh::refresh_access_token(&self.client, &self.spotify, &credential.refresh_token)
                .await?;

        let renewed = merge_refreshed(&credential, response, now);
        self.store.put(&renewed)?;

        tracing::info!("Access token refreshed after upstream 401");
        Ok(renewed)
    }

    /// Authorize URL the login flow should redirect the browser to
    pub fn authorize_url(&self, state: &str) -> Result<String> {
        self.spotify.authorize_url_for_state(state)
    }
}

/// Build the replacement record after a successful refresh.
///
/// The refresh token is never silently dropped: when the issuer omits one,
/// the previously stored token is carried forward. Expiry is the issuer-
/// reported lifetime from `now`, defaulting to 3600 seconds.
fn merge_refreshed(prior: &Credential, response: TokenResponse, now: i64) -> Credential {
    Credential {
        access_token: response.access_token,
        refresh_token: response
            .refresh_token
            .unwrap_or_else(|| prior.refresh_token.clone()),
        expires_at: now + response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn spotify_config(token_url: String) -> SpotifyConfig {
        SpotifyConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "http://127.0.0.1:8000/callback".to_string(),
            token_url,
            authorize_url: "https://accounts.spotify.com/authorize".to_string(),
            api_base: "https://api.spotify.com".to_string(),
        }
    }

    fn manager_with(
        store: Arc<MemoryStore>,
        server: &mockito::Server,
    ) -> AuthManager {
        AuthManager::new(store, spotify_config(format!("{}/api/token", server.url()))).unwrap()
    }

    #[test]
    fn test_merge_carries_refresh_token_forward() {
        let prior = Credential {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: 100,
        };
        let response = TokenResponse {
            access_token: "A2".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
        };

        let merged = merge_refreshed(&prior, response, 1_000);
        assert_eq!(merged.access_token, "A2");
        assert_eq!(merged.refresh_token, "R1");
        assert_eq!(merged.expires_at, 4_600);
    }

    #[test]
    fn test_merge_adopts_rotated_refresh_token() {
        let prior = Credential {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: 100,
        };
        let response = TokenResponse {
            access_token: "A2".to_string(),
            refresh_token: Some("R2".to_string()),
            expires_in: None,
        };

        let merged = merge_refreshed(&prior, response, 1_000);
        assert_eq!(merged.refresh_token, "R2");
        // expires_in omitted defaults to 3600
        assert_eq!(merged.expires_at, 4_600);
    }

    #[tokio::test]
    async fn test_no_credential_makes_no_network_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(store, &server);

        let err = manager.get_valid_access_token().await.unwrap_err();
        assert!(matches!(err, TokenError::NoCredential));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_credential(Credential {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        }));
        let manager = manager_with(store, &server);

        let token = manager.get_valid_access_token().await.unwrap();
        assert_eq!(token, "A1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_inside_margin_triggers_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"A2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        // 30 seconds of validity left: inside the 60-second margin
        let store = Arc::new(MemoryStore::with_credential(Credential {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: Utc::now().timestamp() + 30,
        }));
        let manager = manager_with(store.clone(), &server);

        let token = manager.get_valid_access_token().await.unwrap();
        assert_eq!(token, "A2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_refresh_persists_merged_record() {
        let mut server = mockito::Server::new_async().await;
        // Response omits refresh_token: the stored one must be carried forward
        server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"A2","expires_in":3600}"#)
            .create_async()
            .await;

        let now = Utc::now().timestamp();
        let store = Arc::new(MemoryStore::with_credential(Credential {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: now - 10,
        }));
        let manager = manager_with(store.clone(), &server);

        manager.get_valid_access_token().await.unwrap();

        let stored = store.get().unwrap();
        assert_eq!(stored.access_token, "A2");
        assert_eq!(stored.refresh_token, "R1");
        assert!(stored.expires_at >= now + 3599 && stored.expires_at <= now + 3602);
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_store_untouched() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let stale = Credential {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: Utc::now().timestamp() - 10,
        };
        let store = Arc::new(MemoryStore::with_credential(stale.clone()));
        let manager = manager_with(store.clone(), &server);

        let err = manager.get_valid_access_token().await.unwrap_err();
        assert!(matches!(err, TokenError::RefreshFailed(_)));

        // The stale record survives so the next call retries from it
        assert_eq!(store.get().unwrap(), stale);
    }

    #[tokio::test]
    async fn test_exchange_replaces_any_prior_credential() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"A1","refresh_token":"R1","expires_in":3600}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_credential(Credential {
            access_token: "OLD".to_string(),
            refresh_token: "OLD-R".to_string(),
            expires_at: 0,
        }));
        let manager = manager_with(store.clone(), &server);

        let credential = manager.exchange_authorization_code("AQAcode").await.unwrap();
        assert_eq!(credential.access_token, "A1");
        assert_eq!(credential.refresh_token, "R1");

        // No merge with prior state
        assert_eq!(store.get().unwrap(), credential);
    }

    #[tokio::test]
    async fn test_exchange_without_refresh_token_fails_loudly() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"A1","expires_in":3600}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(store.clone(), &server);

        let err = manager.exchange_authorization_code("AQAcode").await.unwrap_err();
        assert!(err.to_string().contains("refresh token"));
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_refresh_stored_bypasses_freshness_check() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(r#"{"access_token":"A2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        // Credential is nowhere near expiry, yet refresh_stored must refresh
        let store = Arc::new(MemoryStore::with_credential(Credential {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        }));
        let manager = manager_with(store.clone(), &server);

        let renewed = manager.refresh_stored().await.unwrap();
        assert_eq!(renewed.access_token, "A2");
        assert_eq!(store.get().unwrap().access_token, "A2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_stored_with_empty_store_is_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(store, &server);

        assert!(manager.refresh_stored().await.is_err());
        mock.assert_async().await;
    }
}
