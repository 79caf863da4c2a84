//! Server binary - single-process deployment.
//!
//! Wires the local adapters (filesystem artifact store, ffmpeg, in-process
//! task queue) behind the HTTP API.

use std::sync::Arc;
use streambuddy::adapters::local::FfmpegExecutor;
use streambuddy::{router, AppConfig, AppState};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // `.env` may carry RUST_LOG, and config parsing logs what it ignores.
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    let executor = Arc::new(FfmpegExecutor::from_config(&config));
    let state = match AppState::from_config(&config, executor) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to prepare {}: {}", config.media_root.display(), e);
            std::process::exit(1);
        }
    };
    info!(
        "Media root {}, {} transcode workers",
        config.media_root.display(),
        config.worker_count
    );

    let app = router(state, &config.api_prefix);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port))
        .await
        .expect("Failed to bind TCP listener");
    info!("Listening at {}:{}{}", config.addr, config.port, config.api_prefix);
    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
