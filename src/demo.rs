//! Demo routes served by the `graceful-demo` binary.
//!
//! The slow routes make it easy to watch a drain from the outside: start a
//! few `/sleep/5000` requests, send SIGTERM, and see them either complete or
//! get cut off at the grace period.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;

/// Upper bound for `/sleep/{millis}` so a typo cannot park a request for days.
const MAX_SLEEP_MILLIS: u64 = 10 * 60 * 1000;

#[derive(Clone)]
struct DemoState {
    handler_delay: Duration,
}

/// Builds the demo router. `handler_delay` applies to every unmatched path.
pub fn router(handler_delay: Duration) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/sleep/{millis}", get(sleep))
        .fallback(delayed)
        .with_state(DemoState { handler_delay })
}

async fn index() -> &'static str {
    "ok"
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn sleep(Path(millis): Path<u64>) -> impl IntoResponse {
    if millis > MAX_SLEEP_MILLIS {
        return (
            StatusCode::BAD_REQUEST,
            format!("sleep is capped at {}ms", MAX_SLEEP_MILLIS),
        );
    }
    tokio::time::sleep(Duration::from_millis(millis)).await;
    (StatusCode::OK, format!("slept {}ms", millis))
}

async fn delayed(State(state): State<DemoState>) -> &'static str {
    if !state.handler_delay.is_zero() {
        tokio::time::sleep(state.handler_delay).await;
    }
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_index_and_health() {
        let server = TestServer::new(router(Duration::ZERO)).unwrap();

        server.get("/").await.assert_text("ok");

        let health = server.get("/health").await;
        health.assert_status_ok();
        health.assert_json(&json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_sleep_route() {
        let server = TestServer::new(router(Duration::ZERO)).unwrap();

        let response = server.get("/sleep/5").await;
        response.assert_status_ok();
        response.assert_text("slept 5ms");
    }

    #[tokio::test]
    async fn test_sleep_rejects_huge_values() {
        let server = TestServer::new(router(Duration::ZERO)).unwrap();

        let response = server.get("/sleep/999999999").await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_fallback_applies_delay() {
        let server = TestServer::new(router(Duration::from_millis(30))).unwrap();

        let start = std::time::Instant::now();
        server.get("/anything/else").await.assert_text("ok");
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
