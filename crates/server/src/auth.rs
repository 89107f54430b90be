// crates/server/src/auth.rs
//! Token authentication for hook ingestion and WebSocket upgrade.
//!
//! A process-wide token (`AUTH_TOKEN` env) is honored when set. Valid
//! presentations: `Authorization: Bearer <token>` or `?token=<token>`.
//! When no token is configured, all requests are accepted.

use axum::http::HeaderMap;

/// Check a request's credentials against the configured token.
pub fn authorize(
    configured: Option<&str>,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> bool {
    let Some(expected) = configured else {
        return true;
    };

    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(bearer) = value.strip_prefix("Bearer ") {
            if bearer == expected {
                return true;
            }
        }
    }

    query_token == Some(expected)
}

/// Pull `token` out of a raw query string ("a=1&token=xyz").
pub fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        pair.strip_prefix("token=")
            .map(|v| v.to_string())
            .filter(|v| !v.is_empty())
    })
}
