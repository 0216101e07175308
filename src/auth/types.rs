// Authentication types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safety margin applied when deciding whether a stored access token is
/// still usable: a credential with fewer than this many seconds of validity
/// remaining is treated as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Access-token lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// The single persisted credential record for the connected account.
///
/// Serialized verbatim as the store blob; a stored record missing any of
/// these fields deserializes to an error and is treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Short-lived bearer value presented to the Spotify Web API
    pub access_token: String,
    /// Longer-lived secret used to mint new access tokens
    pub refresh_token: String,
    /// Absolute expiry, seconds since epoch
    pub expires_at: i64,
}

impl Credential {
    /// Whether the access token is still usable at `now`, honoring the
    /// 60-second safety margin.
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at > now + EXPIRY_MARGIN_SECS
    }
}

/// Response from the accounts-service token endpoint, for both the
/// `authorization_code` and `refresh_token` grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Spotify may rotate the refresh token or omit it entirely on refresh
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Why no usable access token could be produced
#[derive(Error, Debug)]
pub enum TokenError {
    /// Nothing stored; the login flow has never completed
    #[error("no credential stored")]
    NoCredential,

    /// The stored refresh token was rejected, the token endpoint was
    /// unreachable, or client configuration is missing
    #[error("refresh failed: {0}")]
    RefreshFailed(#[source] anyhow::Error),
}
