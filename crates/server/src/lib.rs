// crates/server/src/lib.rs
//! agent-town server library.
//!
//! An Axum server that reconciles two racy event streams — JSONL transcript
//! tailing and HTTP hook callbacks — into one authoritative in-memory model,
//! fanned out to WebSocket clients.

pub mod auth;
pub mod error;
pub mod guards;
pub mod hooks;
pub mod registry;
pub mod staleness;
pub mod state;
pub mod teams;
pub mod util;
pub mod watcher;
pub mod ws;

pub use error::ApiError;
pub use guards::Guards;
pub use registry::Registry;
pub use state::AppState;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// CORS restricted to localhost origins — a hostile website must not be able
/// to read session data out of a developer's local server via `fetch()`.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |origin: &HeaderValue, _req_parts: &axum::http::request::Parts| {
                if let Ok(origin) = origin.to_str() {
                    origin.starts_with("http://localhost:")
                        || origin.starts_with("http://127.0.0.1:")
                        || origin == "http://localhost"
                        || origin == "http://127.0.0.1"
                } else {
                    false
                }
            },
        ))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
    }))
}

/// Assemble the router: hook ingestion, WebSocket fan-out, health.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .merge(hooks::router())
        .merge(ws::router())
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Start the background tasks: transcript watcher, team watcher, staleness
/// sweeper. Call once after building the state.
///
/// A failed watch-root start is returned to the caller — it is fatal, like a
/// failed port bind.
pub fn spawn_background_tasks(state: &Arc<AppState>) -> anyhow::Result<()> {
    watcher::spawn(state.clone())?;
    teams::spawn(state.clone())?;
    staleness::spawn(state.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_town_core::git::GitExec;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::path::Path;
    use tower::ServiceExt;

    fn noop_exec() -> GitExec {
        Arc::new(|_: &str, _: &[&str], _: &Path| Err(std::io::Error::other("no git")))
    }

    fn app() -> Router {
        create_app(AppState::new(noop_exec(), None))
    }

    async fn get_path(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, body) = get_path(app(), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (status, _) = get_path(app(), "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_allows_localhost() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let allow = response.headers().get("access-control-allow-origin");
        assert_eq!(allow.unwrap(), "http://localhost:5173");
    }

    #[tokio::test]
    async fn cors_rejects_external_origin() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response
            .headers()
            .get("access-control-allow-origin")
            .is_none());
    }
}
