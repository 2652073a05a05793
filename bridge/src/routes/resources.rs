use axum::extract::{Path, State};
use axum::{Json, Router, routing::get};
use serde_json::Value;

use crate::error::AppError;
use crate::extract::ConnectionId;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/mcp/resource/{name}", get(read_resource))
}

/// Read one resource from the manifest.
///
/// `schema.plan.json` is static and needs no linked connection.
#[utoipa::path(
    get,
    path = "/mcp/resource/{name}",
    params(
        ("name" = String, Path, description = "current.json, last_training.json or schema.plan.json"),
        ("cid" = Option<String>, Query, description = "Connection id (or x-connection-id header)")
    ),
    responses(
        (status = 200, description = "Resource payload", body = Object),
        (status = 401, description = "Connection not linked", body = stas_core::error::ApiError),
        (status = 404, description = "Unknown resource", body = stas_core::error::ApiError),
        (status = 502, description = "Gateway failure", body = stas_core::error::ApiError)
    ),
    tag = "mcp"
)]
pub async fn read_resource(
    State(state): State<AppState>,
    Path(name): Path<String>,
    connection_id: ConnectionId,
) -> Result<Json<Value>, AppError> {
    let payload = state
        .resources()
        .read(&name, connection_id.as_deref())
        .await?;
    Ok(Json(payload))
}
