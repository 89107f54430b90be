// crates/server/src/main.rs
//! agent-town server binary.
//!
//! Binds the HTTP/WebSocket server, then starts the transcript watcher, team
//! watcher, and staleness sweeper. Configuration is environment-only:
//! `PORT` (default 3001) and optional `AUTH_TOKEN`.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use agent_town_server::{create_app, spawn_background_tasks, AppState};

/// Default listen port.
const DEFAULT_PORT: u16 = 3001;

fn get_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Respects RUST_LOG; defaults to info for our crates.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,notify=warn")),
        )
        .compact()
        .init();

    let port = get_port();
    let state = AppState::from_env();
    if state.auth_token.is_some() {
        tracing::info!("auth token configured; requests must present it");
    }

    if let Err(e) = spawn_background_tasks(&state) {
        tracing::error!(error = %e, "failed to start filesystem watchers");
        std::process::exit(1);
    }

    let app = create_app(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "agent-town v{} listening", env!("CARGO_PKG_VERSION"));

    axum::serve(listener, app)
        .await
        .context("server exited with error")?;
    Ok(())
}
