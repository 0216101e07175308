use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Confirm, Input, Password};
use std::io::Write;
use std::path::PathBuf;

/// Spotify Gateway - playback control for phone shortcuts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8000")]
    pub port: u16,

    /// Gateway API key for client authentication
    #[arg(short = 'k', long, env = "PROXY_API_KEY")]
    pub api_key: Option<String>,

    /// Spotify application client id
    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Spotify application client secret
    #[arg(long, env = "SPOTIFY_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// OAuth redirect URI registered with the Spotify application
    #[arg(long, env = "SPOTIFY_REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Path to the credential store SQLite file
    #[arg(short = 'd', long, env = "CREDENTIAL_STORE_FILE")]
    pub store_file: Option<String>,

    /// Device name to transfer playback to when a request names none
    #[arg(long, env = "DEFAULT_DEVICE")]
    pub default_device: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Authentication
    pub proxy_api_key: String,

    // Spotify application
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_redirect_uri: String,
    pub spotify_accounts_url: String,
    pub spotify_api_url: String,

    // Credential store
    pub store_file: PathBuf,

    // Playback
    pub default_device: Option<String>,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
}

/// Spotify application identity and endpoint URLs, passed explicitly to the
/// auth manager and HTTP client (injected so tests can point them at a mock
/// server).
#[derive(Clone, Debug)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub token_url: String,
    pub authorize_url: String,
    pub api_base: String,
}

/// Scopes required for device listing and playback transfer
pub const SPOTIFY_SCOPES: &str = "user-read-playback-state user-modify-playback-state";

impl SpotifyConfig {
    /// Full authorize URL to redirect the browser to, carrying the CSRF
    /// state parameter
    pub fn authorize_url_for_state(&self, state: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", SPOTIFY_SCOPES),
                ("state", state),
            ],
        )
        .context("Failed to build authorize URL")?;

        Ok(url.to_string())
    }
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Parse CLI arguments
        let args = CliArgs::parse();

        let server_port = args.port;

        let config = Config {
            server_host: args.host,
            server_port,

            proxy_api_key: args
                .api_key
                .context("PROXY_API_KEY is required (use -k or set PROXY_API_KEY env var)")?,

            spotify_client_id: args
                .client_id
                .context("SPOTIFY_CLIENT_ID is required (set it in .env or the environment)")?,

            spotify_client_secret: args
                .client_secret
                .context("SPOTIFY_CLIENT_SECRET is required (set it in .env or the environment)")?,

            spotify_redirect_uri: args
                .redirect_uri
                .unwrap_or_else(|| format!("http://127.0.0.1:{}/callback", server_port)),

            spotify_accounts_url: std::env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| "https://accounts.spotify.com".to_string()),

            spotify_api_url: std::env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| "https://api.spotify.com".to_string()),

            store_file: args
                .store_file
                .map(|s| expand_tilde(&s))
                .unwrap_or_else(default_store_file),

            default_device: args.default_device,

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.spotify_redirect_uri.starts_with("http://")
            && !self.spotify_redirect_uri.starts_with("https://")
        {
            anyhow::bail!(
                "SPOTIFY_REDIRECT_URI must be an absolute http(s) URL: {}",
                self.spotify_redirect_uri
            );
        }

        reqwest::Url::parse(&self.spotify_accounts_url)
            .with_context(|| format!("Invalid SPOTIFY_ACCOUNTS_URL: {}", self.spotify_accounts_url))?;
        reqwest::Url::parse(&self.spotify_api_url)
            .with_context(|| format!("Invalid SPOTIFY_API_URL: {}", self.spotify_api_url))?;

        Ok(())
    }

    /// The injected Spotify application identity and endpoints
    pub fn spotify(&self) -> SpotifyConfig {
        SpotifyConfig {
            client_id: self.spotify_client_id.clone(),
            client_secret: self.spotify_client_secret.clone(),
            redirect_uri: self.spotify_redirect_uri.clone(),
            token_url: format!("{}/api/token", self.spotify_accounts_url),
            authorize_url: format!("{}/authorize", self.spotify_accounts_url),
            api_base: self.spotify_api_url.clone(),
        }
    }
}

/// Default credential store location under the user data directory
fn default_store_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("spotify-gateway"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("credentials.sqlite3")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file and missing required values)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();

    let has_proxy_key = std::env::var("PROXY_API_KEY").is_ok();
    let has_client_id = std::env::var("SPOTIFY_CLIENT_ID").is_ok();
    let has_client_secret = std::env::var("SPOTIFY_CLIENT_SECRET").is_ok();

    !env_file_exists && (!has_proxy_key || !has_client_id || !has_client_secret)
}

/// Run interactive setup to collect required configuration
pub fn run_interactive_setup() -> Result<InteractiveConfig> {
    println!();
    println!("Spotify Gateway - First Time Setup");
    println!("----------------------------------");
    println!();
    println!("No configuration found. Create an application at");
    println!("https://developer.spotify.com/dashboard and enter its credentials.");
    println!();

    let proxy_api_key: String = Password::new()
        .with_prompt("Enter a password to protect your gateway (PROXY_API_KEY)")
        .interact()
        .context("Failed to read PROXY_API_KEY")?;

    if proxy_api_key.is_empty() {
        anyhow::bail!("PROXY_API_KEY cannot be empty");
    }

    let client_id: String = Input::new()
        .with_prompt("Spotify client id (SPOTIFY_CLIENT_ID)")
        .interact_text()
        .context("Failed to read SPOTIFY_CLIENT_ID")?;

    let client_secret: String = Password::new()
        .with_prompt("Spotify client secret (SPOTIFY_CLIENT_SECRET)")
        .interact()
        .context("Failed to read SPOTIFY_CLIENT_SECRET")?;

    if client_id.is_empty() || client_secret.is_empty() {
        anyhow::bail!("Spotify client id and secret cannot be empty");
    }

    println!();
    let server_port: String = Input::new()
        .with_prompt("Server port")
        .default("8000".to_string())
        .interact_text()
        .context("Failed to read server port")?;

    println!();
    println!(
        "Register http://127.0.0.1:{}/callback as a redirect URI for the application.",
        server_port
    );

    let config = InteractiveConfig {
        proxy_api_key,
        client_id,
        client_secret,
        server_port,
    };

    println!();
    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&config)?;
        println!();
        println!("Configuration saved to .env file");
    }

    println!();
    println!("Setup complete! Starting gateway...");
    println!();

    Ok(config)
}

/// Configuration collected from interactive setup
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub proxy_api_key: String,
    pub client_id: String,
    pub client_secret: String,
    pub server_port: String,
}

/// Save configuration to .env file
fn save_env_file(config: &InteractiveConfig) -> Result<()> {
    let env_content = format!(
        r#"# Spotify Gateway Configuration
# Generated by interactive setup

# Password to protect the gateway (required)
PROXY_API_KEY={}

# Spotify application credentials (required)
SPOTIFY_CLIENT_ID={}
SPOTIFY_CLIENT_SECRET={}

# Server settings
SERVER_HOST=0.0.0.0
SERVER_PORT={}

# Device name used when a transfer request names none
# DEFAULT_DEVICE=echo

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=info
"#,
        config.proxy_api_key, config.client_id, config.client_secret, config.server_port,
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    Ok(())
}
