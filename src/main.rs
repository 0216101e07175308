use anyhow::Result;
use std::sync::Arc;

use spotify_gateway::{auth, config, http_client, middleware, routes, store};

#[tokio::main]
async fn main() -> Result<()> {
    // Check if interactive setup is needed (no .env and missing required values)
    if config::needs_interactive_setup() {
        let interactive = config::run_interactive_setup()?;

        // Set environment variables from interactive config so Config::load() can use them
        std::env::set_var("PROXY_API_KEY", &interactive.proxy_api_key);
        std::env::set_var("SPOTIFY_CLIENT_ID", &interactive.client_id);
        std::env::set_var("SPOTIFY_CLIENT_SECRET", &interactive.client_secret);
        std::env::set_var("SERVER_PORT", &interactive.server_port);
    }

    // Load configuration first (for log level)
    let config = config::Config::load()?;
    config.validate()?;

    // Initialize logging with the configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    tracing::info!("Spotify Gateway starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Open the credential store
    tracing::info!("Opening credential store: {}", config.store_file.display());
    let store = Arc::new(store::SqliteStore::open(&config.store_file)?);

    let auth_manager = Arc::new(auth::AuthManager::new(store, config.spotify())?);

    // Probe the stored credential; absence just means login hasn't happened yet
    match auth_manager.get_valid_access_token().await {
        Ok(token) => {
            tracing::info!(
                "Spotify session active (token: {}...)",
                &token[..10.min(token.len())]
            );
        }
        Err(auth::TokenError::NoCredential) => {
            tracing::warn!("No Spotify account connected yet - visit /login to authenticate");
        }
        Err(e) => {
            tracing::warn!(
                "Stored credential could not be refreshed ({}); visit /login to re-authenticate",
                e
            );
        }
    }

    // Initialize the Spotify HTTP client
    let spotify_client = Arc::new(http_client::SpotifyHttpClient::new(
        auth_manager.clone(),
        config.spotify_api_url.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);

    let app_state = routes::AppState {
        proxy_api_key: config.proxy_api_key.clone(),
        auth_manager: auth_manager.clone(),
        http_client: spotify_client,
        config: Arc::new(config.clone()),
        pending_state: Arc::new(tokio::sync::RwLock::new(None)),
    };

    // Build the application with routes and middleware
    let app = build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Build the application with all routes and middleware
fn build_app(state: routes::AppState) -> axum::Router {
    use axum::Router;

    // Health and login routes (no gateway key required)
    let health_routes = routes::health_routes();
    let login_routes = routes::login_routes(state.clone());

    // Playback routes (gateway key required)
    let player_routes = routes::player_routes(state);

    Router::new()
        .merge(health_routes)
        .merge(login_routes)
        .merge(player_routes)
        .layer(middleware::cors_layer())
}

/// Print startup banner
fn print_startup_banner(config: &config::Config) {
    println!();
    println!("  Spotify Gateway");
    println!("  ---------------");
    println!("  Version:   {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:    http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Login:     GET /login (browser)");
    println!("  Devices:   GET /devices");
    println!("  Transfer:  POST /transfer");
    if let Some(ref device) = config.default_device {
        println!("  Default device: {}", device);
    }
    println!("  Log level: {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
