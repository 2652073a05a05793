//! Custom extractors that convert axum rejections to structured AppError responses.
//!
//! Connector clients are sloppy about `Content-Type` and sometimes post an
//! empty body, so `AppJson<T>` parses the raw bytes itself: an empty body is
//! read as `{}` and any deserialization failure becomes `AppError::Validation`.

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use stas_core::link_code::tokens_match;

use crate::error::AppError;
use crate::state::AppState;

/// JSON body extractor that never produces axum's plain-text rejections.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            AppError::validation(
                format!("Failed to read request body: {}", rejection.body_text()),
                "body",
            )
        })?;
        parse_body(&bytes).map(AppJson)
    }
}

pub fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    let trimmed = bytes.trim_ascii();
    let source: &[u8] = if trimmed.is_empty() { b"{}" } else { trimmed };
    serde_json::from_slice(source).map_err(|err| map_json_error(&err))
}

/// Convert a serde error to a structured `AppError::Validation`.
pub fn map_json_error(err: &serde_json::Error) -> AppError {
    let text = err.to_string();

    // "missing field `external_id`" → field = "external_id"
    let field_hint = extract_field_from_serde_message(&text);

    AppError::Validation {
        message: format!("Invalid request body: {text}"),
        field: Some(field_hint.unwrap_or("body".to_string())),
        received: None,
        docs_hint: Some(
            "Check the request body against the tool's input schema (GET /mcp or tools/list)."
                .to_string(),
        ),
    }
}

/// Try to extract a field name from serde's error messages.
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    for pattern in ["missing field `", "unknown field `"] {
        if let Some(start) = msg.find(pattern) {
            let after = &msg[start + pattern.len()..];
            if let Some(end) = after.find('`') {
                return Some(after[..end].to_string());
            }
        }
    }
    None
}

/// Connection id carried outside the body: header `x-connection-id`, header
/// `x-conn`, query `cid` or query `connection_id`, first non-empty wins.
/// Handlers fall back to a `connection_id` body field via [`ConnectionId::or_body`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionId(pub Option<String>);

#[derive(Debug, Default, Deserialize)]
struct ConnectionQuery {
    cid: Option<String>,
    connection_id: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ConnectionId {
    pub fn or_body(self, body: Option<&str>) -> Option<String> {
        self.0.or_else(|| non_blank(body))
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for ConnectionId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        for header in ["x-connection-id", "x-conn"] {
            let value = parts.headers.get(header).and_then(|v| v.to_str().ok());
            if let Some(id) = non_blank(value) {
                return Ok(ConnectionId(Some(id)));
            }
        }

        let query = Query::<ConnectionQuery>::from_request_parts(parts, state)
            .await
            .map(|Query(q)| q)
            .unwrap_or_default();
        Ok(ConnectionId(
            non_blank(query.cid.as_deref()).or_else(|| non_blank(query.connection_id.as_deref())),
        ))
    }
}

/// Operator credential for `POST /link`: `Authorization: Bearer <BRIDGE_LINK_SECRET>`.
#[derive(Debug)]
pub struct OperatorAuth;

impl FromRequestParts<AppState> for OperatorAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.link_secret.as_deref() else {
            return Err(AppError::Forbidden(
                "Linking is disabled on this bridge; the operator must set BRIDGE_LINK_SECRET"
                    .to_string(),
            ));
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?
            .strip_prefix("Bearer ")
            .ok_or_else(|| {
                AppError::Unauthorized("Authorization header must use Bearer scheme".to_string())
            })?;

        if !tokens_match(token, secret) {
            return Err(AppError::Unauthorized(
                "Invalid operator credential".to_string(),
            ));
        }
        Ok(OperatorAuth)
    }
}
