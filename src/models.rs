// Spotify Web API wire types
// Transient per-call data; nothing here is persisted

use serde::{Deserialize, Serialize};

/// A playback device as reported by `GET /v1/me/player/devices`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Spotify reports null ids for some device classes
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_active: bool,
    /// Restricted devices reject playback commands
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_percent: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<Device>,
}

/// Body of `POST /transfer` from the automation client.
///
/// Both fields optional: an empty body falls back to the configured
/// default device query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferRequest {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    /// Whether playback should start on the target device (default true)
    pub play: Option<bool>,
}

/// Error body shape the Spotify Web API uses for non-success statuses
#[derive(Debug, Deserialize)]
pub struct SpotifyErrorBody {
    pub error: SpotifyErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct SpotifyErrorDetail {
    pub message: Option<String>,
    pub status: Option<u16>,
}

/// Pull the upstream-provided message out of an error body, if present
pub fn upstream_message(body: &str) -> Option<String> {
    serde_json::from_str::<SpotifyErrorBody>(body)
        .ok()?
        .error
        .message
}

/// Resolve a device by case-insensitive name substring match, skipping
/// restricted devices. This is the "find my Echo" path: a query of "echo"
/// matches a device named "Echo Dot".
pub fn find_device<'a>(devices: &'a [Device], query: &str) -> Option<&'a Device> {
    let needle = query.to_lowercase();
    devices
        .iter()
        .filter(|d| !d.is_restricted)
        .find(|d| d.name.to_lowercase().contains(&needle))
}
