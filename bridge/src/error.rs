use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use stas_core::error::{ApiError, codes};
use stas_core::plan::ValidationResult;

use crate::gateway::GatewayError;
use crate::identity::IdentityError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Malformed request (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<Value>,
        docs_hint: Option<String>,
    },
    /// Draft failed the plan validator; nothing was written (422)
    ValidationFailed(ValidationResult),
    /// No identity for this connection (401)
    Unlinked { connection_id: Option<String> },
    /// Missing or wrong credential (401)
    Unauthorized(String),
    /// Operation is turned off or acts for another user (403)
    Forbidden(String),
    /// Link request for a connection that is not pending (409)
    LinkConflict {
        connection_id: String,
        message: String,
    },
    /// Gateway unreachable or rejected the call (502, 504 on timeout)
    Gateway {
        status: Option<u16>,
        message: String,
        timed_out: bool,
    },
    /// Stale `if_match` on update (409)
    Conflict {
        message: String,
        etag_current: Option<String>,
    },
    /// Unknown resource, tool or plan (404)
    NotFound(String),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unlinked { .. } | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Gateway {
                timed_out: true, ..
            } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            AppError::Conflict { .. } | AppError::LinkConflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured body for this error. Logs server-side failures as a side effect.
    pub fn to_api_error(&self) -> ApiError {
        let request_id = crate::middleware::request_id::current();

        match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => {
                let mut body = ApiError::new(codes::INVALID_REQUEST, message.clone(), request_id);
                body.field = field.clone();
                body.received = received.clone();
                body.docs_hint = docs_hint.clone();
                body
            }
            AppError::ValidationFailed(result) => {
                let mut body = ApiError::new(
                    codes::VALIDATION_FAILED,
                    format!("Draft has {} blocking error(s)", result.errors.len()),
                    request_id,
                );
                body.docs_hint = Some(
                    "Run plan.validate and fix every entry in errors before publishing."
                        .to_string(),
                );
                body.details = Some(json!({
                    "errors": result.errors,
                    "warnings": result.warnings,
                }));
                body
            }
            AppError::Unlinked { connection_id } => {
                let mut body = ApiError::new(
                    codes::UNLINKED,
                    "This connection is not linked to an athlete",
                    request_id,
                );
                body.next_action = Some(match connection_id {
                    Some(cid) => format!("/link?connection_id={cid}"),
                    None => "/link".to_string(),
                });
                body.docs_hint = Some(
                    "Open the link URL once to connect this connector to your account."
                        .to_string(),
                );
                body
            }
            AppError::Unauthorized(message) => {
                tracing::warn!(event = "unauthorized", error = %message, "request rejected");
                ApiError::new(codes::UNAUTHORIZED, message.clone(), request_id)
            }
            AppError::Forbidden(message) => {
                ApiError::new(codes::FORBIDDEN, message.clone(), request_id)
            }
            AppError::LinkConflict {
                connection_id,
                message,
            } => {
                let mut body = ApiError::new(codes::CONFLICT, message.clone(), request_id);
                body.field = Some("connection_id".to_string());
                body.next_action = Some(format!("/link?connection_id={connection_id}"));
                body
            }
            AppError::Gateway {
                status,
                message,
                timed_out,
            } => {
                tracing::error!(
                    event = "gateway_error",
                    status = ?status,
                    timed_out,
                    error = %message,
                    "gateway call failed"
                );
                let mut body = ApiError::new(codes::GATEWAY_ERROR, message.clone(), request_id);
                body.details = Some(json!({ "status": status, "timed_out": timed_out }));
                body
            }
            AppError::Conflict {
                message,
                etag_current,
            } => {
                let mut body = ApiError::new(codes::CONFLICT, message.clone(), request_id);
                body.field = Some("if_match".to_string());
                body.details = Some(json!({ "etag_current": etag_current }));
                body.docs_hint =
                    Some("Read plan.status for the current etag and retry.".to_string());
                body
            }
            AppError::NotFound(what) => {
                ApiError::new(codes::NOT_FOUND, format!("{what} not found"), request_id)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ApiError::new(
                    codes::INTERNAL_ERROR,
                    "An internal error occurred",
                    request_id,
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_api_error())).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected {
                status: 409,
                message,
                payload,
            } => AppError::Conflict {
                message,
                etag_current: payload
                    .as_ref()
                    .and_then(|p| p.get("etag_current"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            GatewayError::Rejected {
                status, message, ..
            } => AppError::Gateway {
                status: Some(status),
                message,
                timed_out: false,
            },
            GatewayError::Unavailable { message, timed_out } => AppError::Gateway {
                status: None,
                message,
                timed_out,
            },
            GatewayError::BadPayload(message) => AppError::Gateway {
                status: None,
                message,
                timed_out: false,
            },
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unlinked { connection_id } => AppError::Unlinked { connection_id },
            IdentityError::InvalidInput(message) => {
                let field = message.split_whitespace().next().unwrap_or("body");
                AppError::validation(message, field)
            }
            IdentityError::NotPending { ref connection_id }
            | IdentityError::AlreadyLinked { ref connection_id } => AppError::LinkConflict {
                connection_id: connection_id.clone(),
                message: err.to_string(),
            },
            IdentityError::InvalidCode => AppError::Unauthorized(err.to_string()),
            IdentityError::SessionDisabled => AppError::Forbidden(err.to_string()),
            IdentityError::Store(msg) => AppError::Internal(format!("link store: {msg}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_conflict_carries_current_etag() {
        let err = AppError::from(GatewayError::Rejected {
            status: 409,
            message: "etag mismatch".to_string(),
            payload: Some(json!({ "etag_current": "abc" })),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let body = serde_json::to_value(err.to_api_error()).unwrap();
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["details"]["etag_current"], "abc");
    }

    #[test]
    fn gateway_timeout_maps_to_504() {
        let err = AppError::from(GatewayError::Unavailable {
            message: "timed out".to_string(),
            timed_out: true,
        });
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let err = AppError::from(GatewayError::Rejected {
            status: 500,
            message: "boom".to_string(),
            payload: None,
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn unlinked_points_at_link_flow() {
        let err = AppError::from(IdentityError::Unlinked {
            connection_id: Some("c1".to_string()),
        });
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        let body = serde_json::to_value(err.to_api_error()).unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "unlinked");
        assert_eq!(body["next_action"], "/link?connection_id=c1");
    }

    #[test]
    fn link_errors_map_to_conflict_and_unauthorized() {
        let err = AppError::from(IdentityError::NotPending {
            connection_id: "c2".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let body = serde_json::to_value(err.to_api_error()).unwrap();
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["next_action"], "/link?connection_id=c2");

        let err = AppError::from(IdentityError::InvalidCode);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        let body = serde_json::to_value(err.to_api_error()).unwrap();
        assert_eq!(body["error"], "unauthorized");

        let err = AppError::from(IdentityError::SessionDisabled);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn validation_failure_lists_errors() {
        let result = ValidationResult::from_findings(
            vec!["days is required".to_string()],
            vec![],
        );
        let err = AppError::ValidationFailed(result);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = serde_json::to_value(err.to_api_error()).unwrap();
        assert_eq!(body["details"]["errors"], json!(["days is required"]));
    }
}
