use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};

use server::config::ServerConfig;
use server::{app, AppState};
use tts_core::PiperEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting streaming TTS server...");

    // Load configuration from environment
    let config = ServerConfig::from_env();

    info!("Loading voices from {}", config.voices_map.display());
    let engine = PiperEngine::new_from_mapfile(&config.voices_map).unwrap_or_else(|e| {
        warn!("Could not load voices map: {e:#}, using empty map.");
        PiperEngine::new(Default::default())
    });

    let state = AppState::new(Box::new(engine), config.clone());
    info!("Loaded {} TTS languages", state.languages.len());
    info!(
        "Server configuration loaded: port={}, timeout={}s, output_dir={}, max_skipped_ratio={}",
        config.port,
        config.request_timeout_secs,
        config.output_dir.display(),
        config.max_skipped_ratio
    );
    if config.cors_allowed_origins.is_none() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
