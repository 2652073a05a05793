//! Bodies of the athlete read tools (`user.*`) and the session identity
//! tools (`session.*`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Gateway user ids arrive as integers or strings. Blank strings, floats and
/// other JSON types are not ids.
pub fn user_id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => n
            .as_i64()
            .map(|id| id.to_string())
            .or_else(|| n.as_u64().map(|id| id.to_string())),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SummaryRequest {
    /// Must match the caller's resolved identity when given
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LastTrainingRequest {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub user_id: Option<Value>,
    /// Window start (YYYY-MM-DD), defaults to 13 days before `newest`
    #[serde(default)]
    pub oldest: Option<String>,
    /// Window end (YYYY-MM-DD), defaults to today (UTC)
    #[serde(default)]
    pub newest: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SessionUserRequest {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SummaryResponse {
    pub ok: bool,
    #[schema(value_type = Object)]
    pub summary: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct DateRange {
    #[schema(value_type = String, format = Date)]
    pub oldest: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub newest: NaiveDate,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LastTrainingResponse {
    pub ok: bool,
    /// Latest dated training not after `range.newest`, or null
    #[schema(value_type = Option<Object>)]
    pub last: Option<Value>,
    /// Trainings the gateway returned for the window
    pub count: usize,
    pub range: DateRange,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionUserResponse {
    pub ok: bool,
    /// Session identity for this connection, or null
    pub user_id: Option<String>,
    /// Identity tool calls will act for, after fixed and linked identities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionClearResponse {
    pub ok: bool,
    pub cleared: bool,
}
