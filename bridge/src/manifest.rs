use serde::Serialize;
use serde_json::{Value, json};
use stas_core::schema::plan_schema;
use utoipa::ToSchema;

use crate::dispatcher::Tool;
use crate::resources::Resource;

pub const SERVER_NAME: &str = "stas-mcp-bridge";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ManifestEntry {
    pub name: String,
    pub path: String,
    /// HTTP method, tools only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Everything the bridge offers, built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub resources: Vec<ManifestEntry>,
    pub tools: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn build() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Resource::ALL
                .into_iter()
                .map(|r| ManifestEntry {
                    name: r.name().to_string(),
                    path: r.path(),
                    method: None,
                })
                .collect(),
            tools: Tool::ALL
                .into_iter()
                .map(|t| ManifestEntry {
                    name: t.name().to_string(),
                    path: t.path(),
                    method: Some("POST".to_string()),
                })
                .collect(),
        }
    }
}

pub struct ToolDefinition {
    pub tool: Tool,
    pub description: &'static str,
    pub input_schema: Value,
}

fn confirm_schema(description: &str) -> Value {
    json!({ "type": "boolean", "description": description })
}

fn user_id_schema(description: &str) -> Value {
    json!({ "type": ["integer", "string"], "description": description })
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            tool: Tool::Validate,
            description: "Check a plan draft. Returns errors (blocking), warnings and a diff against the published version.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "draft": plan_schema(),
                    "external_id": { "type": "string" },
                    "athlete_id": { "type": "string" },
                    "meta": { "type": ["object", "null"] },
                    "days": { "type": "array" }
                }
            }),
        },
        ToolDefinition {
            tool: Tool::Publish,
            description: "Publish a validated plan. Without confirm:true nothing is written and need_confirm is returned.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "external_id": { "type": "string", "description": "plan:<token>; idempotency key" },
                    "draft": plan_schema(),
                    "confirm": confirm_schema("Must be true to write")
                },
                "required": ["draft"]
            }),
        },
        ToolDefinition {
            tool: Tool::Delete,
            description: "Delete a published plan by external_id. Deleting a missing plan succeeds.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "external_id": { "type": "string" },
                    "confirm": confirm_schema("Must be true to delete")
                },
                "required": ["external_id"]
            }),
        },
        ToolDefinition {
            tool: Tool::Update,
            description: "Patch a published plan. Dry run unless confirm:true; pass if_match with the etag from plan.status.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "external_id": { "type": "string" },
                    "patch": { "type": "object" },
                    "confirm": confirm_schema("true applies the patch, otherwise only a preview"),
                    "if_match": { "type": "string", "description": "Expected current etag" }
                },
                "required": ["external_id", "patch"]
            }),
        },
        ToolDefinition {
            tool: Tool::Status,
            description: "Report whether a plan is published, with its etag.",
            input_schema: json!({
                "type": "object",
                "properties": { "external_id": { "type": "string" } },
                "required": ["external_id"]
            }),
        },
        ToolDefinition {
            tool: Tool::List,
            description: "List published plans, newest first.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "athlete_id": { "type": "string" },
                    "date_from": { "type": "string", "format": "date" },
                    "date_to": { "type": "string", "format": "date" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 200, "default": 50 },
                    "cursor": { "type": "string" }
                }
            }),
        },
        ToolDefinition {
            tool: Tool::SummaryFetch,
            description: "Read the athlete summary for the caller's identity.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": user_id_schema("Optional; must match the caller's identity")
                }
            }),
        },
        ToolDefinition {
            tool: Tool::LastTrainingFetch,
            description: "Read trainings in a window (default the last 14 days) and return the latest finished one.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": user_id_schema("Optional; must match the caller's identity"),
                    "oldest": { "type": "string", "format": "date" },
                    "newest": { "type": "string", "format": "date" }
                }
            }),
        },
        ToolDefinition {
            tool: Tool::SessionSetUser,
            description: "Act as user_id for this connection until cleared. Only when the bridge allows session identities.",
            input_schema: json!({
                "type": "object",
                "properties": { "user_id": user_id_schema("Gateway user id") },
                "required": ["user_id"]
            }),
        },
        ToolDefinition {
            tool: Tool::SessionGetUser,
            description: "Return the session user_id for this connection and the identity calls will use.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            tool: Tool::SessionClearUser,
            description: "Forget the session user_id for this connection.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}
