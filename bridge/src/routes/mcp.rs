//! JSON-RPC 2.0 adapter over the same dispatcher and resource reader as the
//! plain HTTP routes. `GET /mcp` serves the manifest.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Map, Value, json};

use crate::dispatcher::Tool;
use crate::error::AppError;
use crate::extract::ConnectionId;
use crate::manifest::{Manifest, SERVER_NAME, tool_definitions};
use crate::resources::Resource;
use crate::state::AppState;

const MCP_PATH: &str = "/mcp";
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub fn router() -> Router<AppState> {
    Router::new().route(MCP_PATH, post(mcp_post).get(mcp_manifest))
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "Parse error".to_string(),
            data: None,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// Bridge errors keep their structured body in `data`.
    fn from_app(err: &AppError) -> Self {
        let body = err.to_api_error();
        Self {
            code: -32000,
            message: body.message.clone(),
            data: serde_json::to_value(&body).ok(),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// Manifest as plain JSON, the same document the stream sends first.
#[utoipa::path(
    get,
    path = "/mcp",
    responses(
        (status = 200, description = "Bridge manifest", body = Manifest)
    ),
    tag = "mcp"
)]
pub async fn mcp_manifest(State(state): State<AppState>) -> Json<Manifest> {
    Json(state.manifest.as_ref().clone())
}

/// JSON-RPC endpoint. Protocol errors are JSON-RPC errors with status 200;
/// a request made only of notifications gets 202 and no body.
#[utoipa::path(
    post,
    path = "/mcp",
    request_body(content = Object, description = "JSON-RPC request, notification or batch"),
    responses(
        (status = 200, description = "JSON-RPC response or batch of responses", body = Object),
        (status = 202, description = "Notifications accepted")
    ),
    tag = "mcp"
)]
pub async fn mcp_post(
    State(state): State<AppState>,
    connection_id: ConnectionId,
    body: Bytes,
) -> Response {
    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(error_response(Value::Null, RpcError::parse_error())),
            )
                .into_response();
        }
    };

    let session = RpcSession {
        state: &state,
        connection_id: connection_id.0,
    };

    if let Some(batch) = incoming.as_array() {
        if batch.is_empty() {
            return (
                StatusCode::OK,
                Json(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                )),
            )
                .into_response();
        }
        let mut responses = Vec::new();
        for item in batch {
            if let Some(response) = session.handle_single_message(item.clone()).await {
                responses.push(response);
            }
        }
        if responses.is_empty() {
            return StatusCode::ACCEPTED.into_response();
        }
        return (StatusCode::OK, Json(Value::Array(responses))).into_response();
    }

    match session.handle_single_message(incoming).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

struct RpcSession<'a> {
    state: &'a AppState,
    connection_id: Option<String>,
}

impl RpcSession<'_> {
    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A client response; the bridge never issues requests of its own.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let Some(id) = obj.get("id").cloned() else {
            tracing::debug!(event = "rpc_notification", method, "notification ignored");
            return None;
        };

        Some(match self.handle_request(method, params).await {
            Ok(payload) => success_response(id, payload),
            Err(err) => error_response(id, err),
        })
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(resources_list_payload()),
            "resources/read" => self.handle_resources_read(params).await,
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;
        let tool = Tool::from_name(name)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown tool '{name}'")))?;

        let args = tool_arguments(params)?;
        let connection_id = self.connection_id.clone().or_else(|| {
            args.get("connection_id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        });

        tracing::debug!(event = "rpc_tool_call", tool = name, "tools/call");
        let (envelope, is_error) = match self
            .state
            .dispatcher()
            .call(tool, Value::Object(args), connection_id)
            .await
        {
            Ok(result) => (result, false),
            Err(err) => {
                let body = serde_json::to_value(err.to_api_error()).unwrap_or(Value::Null);
                (body, true)
            }
        };
        Ok(build_tool_call_response(envelope, is_error))
    }

    async fn handle_resources_read(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("resources/read params must be an object"))?;
        let uri = params.get("uri").and_then(Value::as_str).ok_or_else(|| {
            RpcError::invalid_params("resources/read requires string field 'uri'")
        })?;
        let resource = Resource::from_uri(uri)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown resource uri '{uri}'")))?;

        let payload = self
            .state
            .resources()
            .read_resource(resource, self.connection_id.as_deref())
            .await
            .map_err(|err| RpcError::from_app(&err))?;
        let text = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": text
            }]
        }))
    }
}

/// `arguments` as an object or a JSON-encoded string; `args` is accepted as
/// an alias.
fn tool_arguments(params: &Map<String, Value>) -> Result<Map<String, Value>, RpcError> {
    let raw = params.get("arguments").or_else(|| params.get("args"));
    match raw {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::Null) | None => Ok(Map::new()),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(RpcError::invalid_params(
                "tools/call 'arguments' string must encode a JSON object",
            )),
        },
        Some(_) => Err(RpcError::invalid_params(
            "tools/call 'arguments' must be an object",
        )),
    }
}

fn build_tool_call_response(envelope: Value, is_error: bool) -> Value {
    let text = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

fn initialize_payload() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "instructions": "Read schema.plan.json, draft a plan, run plan.validate, then plan.publish with confirm:true once the user agrees."
    })
}

fn tools_list_payload() -> Value {
    let tools: Vec<Value> = tool_definitions()
        .into_iter()
        .map(|def| {
            json!({
                "name": def.tool.name(),
                "description": def.description,
                "inputSchema": def.input_schema,
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn resources_list_payload() -> Value {
    let resources: Vec<Value> = Resource::ALL
        .into_iter()
        .map(|res| {
            json!({
                "uri": res.uri(),
                "name": res.name(),
                "description": res.description(),
                "mimeType": "application/json"
            })
        })
        .collect();
    json!({ "resources": resources })
}
