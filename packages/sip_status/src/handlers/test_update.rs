use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use extension_state::{DeviceStatus, DeviceUpdate, Extension};
use serde::Deserialize;
use tracing::info;

use crate::AppState;

const DEFAULT_EXTENSION: &str = "12345";
const DEFAULT_STATE: &str = "In use";

#[derive(Debug, Deserialize)]
pub struct TestUpdateQuery {
    pub ext: Option<String>,
    pub state: Option<String>,
}

/// `GET /test-update?ext=..&state=..` - debug hook that pushes a synthetic
/// update to every viewer. The store is left alone.
pub async fn test_update_handler(
    State(state): State<AppState>,
    Query(query): Query<TestUpdateQuery>,
) -> Response {
    let raw_ext = query.ext.as_deref().unwrap_or(DEFAULT_EXTENSION);
    let Some(extension) = Extension::parse(raw_ext) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Invalid extension {raw_ext:?}"),
        )
            .into_response();
    };

    // Canonical labels first, raw PBX states otherwise
    let raw_state = query.state.as_deref().unwrap_or(DEFAULT_STATE);
    let status = raw_state
        .parse::<DeviceStatus>()
        .unwrap_or_else(|_| DeviceStatus::from_raw(raw_state));

    let report = state
        .broadcaster
        .broadcast(DeviceUpdate {
            extension: extension.clone(),
            status,
        })
        .await;
    state.metrics.test_update_sent();
    info!(
        extension = %extension,
        status = %status,
        delivered = report.delivered,
        "Sent test update"
    );

    format!("Sent update for extension {extension} with state {status}").into_response()
}
