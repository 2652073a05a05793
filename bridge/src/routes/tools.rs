use axum::extract::{Path, State};
use axum::{Json, Router, routing::post};
use serde_json::Value;

use crate::dispatcher::Tool;
use crate::error::AppError;
use crate::extract::{AppJson, ConnectionId};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/mcp/tool/{name}", post(call_tool))
}

/// Invoke a plan, athlete read or session tool.
///
/// `plan.publish` and `plan.delete` return `{ok:false, need_confirm:true}`
/// with status 200 until called with `confirm: true`.
#[utoipa::path(
    post,
    path = "/mcp/tool/{name}",
    params(
        ("name" = String, Path, description = "plan.validate, plan.publish, plan.delete, plan.update, plan.status, plan.list, user.summary.fetch, user.last_training.fetch, session.set_user_id, session.get_user_id or session.clear_user_id"),
        ("cid" = Option<String>, Query, description = "Connection id (or x-connection-id header)")
    ),
    request_body(content = Object, description = "Tool arguments; plan.validate takes the draft itself"),
    responses(
        (status = 200, description = "Tool result or need_confirm gate", body = Object),
        (status = 400, description = "Malformed arguments", body = stas_core::error::ApiError),
        (status = 401, description = "Connection not linked", body = stas_core::error::ApiError),
        (status = 403, description = "user_id is not the caller, or session identities are disabled", body = stas_core::error::ApiError),
        (status = 404, description = "Unknown tool", body = stas_core::error::ApiError),
        (status = 409, description = "Stale if_match on plan.update", body = stas_core::error::ApiError),
        (status = 422, description = "Draft failed validation", body = stas_core::error::ApiError),
        (status = 502, description = "Gateway failure", body = stas_core::error::ApiError)
    ),
    tag = "mcp"
)]
pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    connection_id: ConnectionId,
    AppJson(args): AppJson<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = Tool::from_name(&name).ok_or_else(|| AppError::NotFound(format!("tool '{name}'")))?;
    let result = state.dispatcher().call(tool, args, connection_id.0).await?;
    Ok(Json(result))
}
