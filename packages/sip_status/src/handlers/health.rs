use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::atomic::Ordering;

use crate::AppState;
use crate::metrics;

fn upstream_connected(state: &AppState) -> bool {
    state
        .upstream
        .as_ref()
        .is_some_and(|client| client.is_connected())
}

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connected = upstream_connected(&state);
    let synced = state.sync_report.get().is_some();

    let status = if connected && synced {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        upstream_connected: connected,
        synced,
        extensions: state.store.len().await,
        connections: state.metrics.active_connections.load(Ordering::Relaxed),
        uptime_secs: state.metrics.uptime_secs(),
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot(
        state.pipeline_stats.snapshot(),
        state.sync_report.get().copied(),
    ))
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - 200 once the upstream is connected and the initial
/// sync has finished
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let connected = upstream_connected(&state);
    let synced = state.sync_report.get().is_some();

    if connected && synced {
        Json(serde_json::json!({
            "status": "ready",
            "upstream": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "upstream": if connected { "connected" } else { "disconnected" },
                "synced": synced
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use extension_state::{DeviceStatus, Extension, SyncReport};
    use tower::ServiceExt;

    fn test_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(health_live_handler))
            .route("/health/ready", get(health_ready_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_without_upstream_is_degraded() {
        let state = crate::test_helpers::test_app_state();
        state
            .store
            .upsert(&Extension::parse("12345").unwrap(), DeviceStatus::InUse)
            .await;

        let (status, json) = get_json(test_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["upstream_connected"], false);
        assert_eq!(json["extensions"], 1);
    }

    #[tokio::test]
    async fn test_live() {
        let state = crate::test_helpers::test_app_state();
        let (status, json) = get_json(test_router(state), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "alive");
    }

    #[tokio::test]
    async fn test_not_ready_until_upstream_and_sync() {
        let state = crate::test_helpers::test_app_state();
        let (status, json) = get_json(test_router(state.clone()), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "not_ready");
        assert_eq!(json["synced"], false);

        // Sync alone is not enough without a live upstream
        state.sync_report.set(SyncReport::default()).unwrap();
        let (status, json) = get_json(test_router(state), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["synced"], true);
    }

    #[tokio::test]
    async fn test_metrics_includes_sync_once_done() {
        let state = crate::test_helpers::test_app_state();
        let (_, json) = get_json(test_router(state.clone()), "/metrics").await;
        assert!(json["sync"].is_null());
        assert_eq!(json["connections"]["active"], 0);

        state
            .sync_report
            .set(SyncReport {
                preloaded: 2,
                applied: 5,
                completed: true,
                published: 5,
            })
            .unwrap();
        let (_, json) = get_json(test_router(state), "/metrics").await;
        assert_eq!(json["sync"]["applied"], 5);
        assert_eq!(json["sync"]["completed"], true);
    }
}
