use axum::{Json, Router, routing::get};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(health_check))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
    /// Unix seconds
    pub ts: i64,
}

/// Liveness check. Never touches the gateway.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Bridge is up", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        ts: Utc::now().timestamp(),
    })
}
