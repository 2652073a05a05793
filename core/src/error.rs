use serde::Serialize;
use utoipa::ToSchema;

/// Structured error body returned by every bridge endpoint.
/// Connector clients branch on `ok` and `error`; the rest is context for the
/// agent driving the connector.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Always false for errors
    pub ok: bool,
    /// Machine-readable error code (see [`codes`])
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
    /// Recommended client action (e.g. the linking path)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    /// Error-specific payload (validation errors, gateway status, etag)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(error: &str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.to_string(),
            message: message.into(),
            field: None,
            received: None,
            request_id: request_id.into(),
            docs_hint: None,
            next_action: None,
            details: None,
        }
    }
}

/// Error codes used across the bridge
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NEED_CONFIRM: &str = "need_confirm";
    pub const UNLINKED: &str = "unlinked";
    pub const GATEWAY_ERROR: &str = "gateway_error";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}
