//! One-time linking of a connector connection to a gateway user, plus the
//! `whoami` diagnostic.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::{AppJson, ConnectionId, OperatorAuth};
use crate::identity::{IdentityError, IdentitySource, LINK_CODE_TTL_MINUTES, LinkStatus};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/link", get(start_link).post(complete_link))
        .route("/_link", get(start_link).post(complete_link))
        .route("/whoami", get(whoami))
        .route("/_whoami", get(whoami))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LinkStatusResponse {
    pub ok: bool,
    pub connection_id: String,
    /// "pending" or "linked"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// One-time code to redeem with `POST /link`. Only returned while pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LinkRequest {
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Code from `GET /link` for this connection
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WhoamiResponse {
    pub ok: bool,
    /// "bridge" or "stub"
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub source: Option<IdentitySource>,
}

fn status_response(
    connection_id: String,
    status: LinkStatus,
    link_code: Option<String>,
) -> LinkStatusResponse {
    match status {
        LinkStatus::Linked { user_id } => LinkStatusResponse {
            ok: true,
            connection_id,
            status: "linked".to_string(),
            user_id: Some(user_id),
            link_code: None,
            expires_in_secs: None,
            next_action: None,
        },
        LinkStatus::Pending | LinkStatus::Unknown => LinkStatusResponse {
            ok: true,
            connection_id,
            status: "pending".to_string(),
            user_id: None,
            expires_in_secs: link_code.as_ref().map(|_| LINK_CODE_TTL_MINUTES * 60),
            link_code,
            next_action: Some(
                "Ask the bridge operator to POST /link {connection_id, code, user_id}".to_string(),
            ),
        },
    }
}

/// Start linking a connection. Marks it pending and issues a fresh one-time
/// code unless already linked.
#[utoipa::path(
    get,
    path = "/link",
    params(
        ("connection_id" = Option<String>, Query, description = "Connection to link (or cid / x-connection-id)")
    ),
    responses(
        (status = 200, description = "Current link status and, while pending, a link code", body = LinkStatusResponse),
        (status = 400, description = "No connection id", body = stas_core::error::ApiError)
    ),
    tag = "link"
)]
pub async fn start_link(
    State(state): State<AppState>,
    connection_id: ConnectionId,
) -> Result<Json<LinkStatusResponse>, AppError> {
    let connection_id = connection_id
        .0
        .ok_or(IdentityError::InvalidInput("connection_id must be provided"))?;
    let start = state.identity.start_link(&connection_id).await?;
    Ok(Json(status_response(connection_id, start.status, start.code)))
}

/// Complete a pending link by redeeming its code. Operator only.
#[utoipa::path(
    post,
    path = "/link",
    request_body = LinkRequest,
    responses(
        (status = 200, description = "Connection linked", body = LinkStatusResponse),
        (status = 400, description = "Missing connection_id, code or user_id", body = stas_core::error::ApiError),
        (status = 401, description = "Missing or invalid operator credential, or bad link code", body = stas_core::error::ApiError),
        (status = 403, description = "Linking disabled on this bridge", body = stas_core::error::ApiError),
        (status = 409, description = "Connection is not pending", body = stas_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "link"
)]
pub async fn complete_link(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    connection_id: ConnectionId,
    AppJson(req): AppJson<LinkRequest>,
) -> Result<Json<LinkStatusResponse>, AppError> {
    let connection_id = ConnectionId(
        req.connection_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
    )
    .or_body(connection_id.as_deref())
    .unwrap_or_default();
    let status = state
        .identity
        .complete_link(
            &connection_id,
            req.code.as_deref().unwrap_or_default(),
            req.user_id.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok(Json(status_response(connection_id, status, None)))
}

/// Diagnostic: current mode and the identity this connection resolves to.
#[utoipa::path(
    get,
    path = "/whoami",
    params(
        ("connection_id" = Option<String>, Query, description = "Connection to resolve (or cid / x-connection-id)")
    ),
    responses(
        (status = 200, description = "Mode and identity", body = WhoamiResponse)
    ),
    tag = "link"
)]
pub async fn whoami(
    State(state): State<AppState>,
    connection_id: ConnectionId,
) -> Result<Json<WhoamiResponse>, AppError> {
    let resolved = match state.identity.resolve(connection_id.as_deref()).await {
        Ok(identity) => Some(identity),
        Err(IdentityError::Unlinked { .. }) => None,
        Err(err) => return Err(err.into()),
    };
    Ok(Json(WhoamiResponse {
        ok: true,
        mode: state.mode.as_str().to_string(),
        connection_id: connection_id.0,
        linked: resolved.is_some(),
        user_id: resolved.as_ref().map(|r| r.user_id.clone()),
        source: resolved.map(|r| r.source),
    }))
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::routes::test_support::{body_json, test_app};
    use crate::state::test_support::{LINK_SECRET, linking_state, stub_state};

    fn post_link(body: Value, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/link")
            .header("content-type", "application/json");
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn get_json(app: &Router, uri: &str) -> Value {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    #[tokio::test]
    async fn link_flow_then_whoami() {
        let (state, _) = linking_state();
        let app = test_app(state);

        let body = get_json(&app, "/_link?connection_id=c1").await;
        assert_eq!(body["status"], "pending");
        assert_eq!(body["expires_in_secs"], 900);
        let code = body["link_code"].as_str().unwrap().to_string();

        let body = get_json(&app, "/whoami?cid=c1").await;
        assert_eq!(body["linked"], false);
        assert_eq!(body["mode"], "stub");

        let response = app
            .clone()
            .oneshot(post_link(
                json!({"connection_id": "c1", "code": code, "user_id": "42"}),
                Some(LINK_SECRET),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "linked");
        assert!(body.get("link_code").is_none());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_whoami")
                    .header("x-connection-id", "c1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["linked"], true);
        assert_eq!(body["user_id"], "42");
        assert_eq!(body["source"], "link");
    }

    #[tokio::test]
    async fn link_requires_connection_code_and_user() {
        let (state, _) = linking_state();
        let app = test_app(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/link").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post_link(json!({"connection_id": "c1", "user_id": "42"}), Some(LINK_SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["field"], "code");

        let response = app
            .oneshot(post_link(json!({"connection_id": "c1", "code": "lc_x"}), Some(LINK_SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["field"], "user_id");
    }

    #[tokio::test]
    async fn post_link_is_forbidden_without_configured_secret() {
        let (state, _) = stub_state(None);
        let app = test_app(state);
        let code = get_json(&app, "/link?cid=c1").await["link_code"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(post_link(
                json!({"connection_id": "c1", "code": code, "user_id": "42"}),
                Some("anything"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"], "forbidden");
        assert_eq!(get_json(&app, "/whoami?cid=c1").await["linked"], false);
    }

    #[tokio::test]
    async fn post_link_requires_operator_bearer() {
        let (state, _) = linking_state();
        let app = test_app(state);
        let code = get_json(&app, "/link?cid=c1").await["link_code"]
            .as_str()
            .unwrap()
            .to_string();
        let body = json!({"connection_id": "c1", "code": code, "user_id": "42"});

        let response = app.clone().oneshot(post_link(body.clone(), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "unauthorized");

        let response = app
            .clone()
            .oneshot(post_link(body.clone(), Some("not-the-secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/link")
                    .header("authorization", LINK_SECRET)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(get_json(&app, "/whoami?cid=c1").await["linked"], false);
    }

    #[tokio::test]
    async fn link_without_started_flow_conflicts_and_stays_unlinked() {
        let (state, _) = linking_state();
        let app = test_app(state);

        let response = app
            .clone()
            .oneshot(post_link(
                json!({"connection_id": "victim", "code": "lc_guess", "user_id": "666"}),
                Some(LINK_SECRET),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["next_action"], "/link?connection_id=victim");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/mcp/resource/current.json")
                    .header("x-connection-id", "victim")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "unlinked");
    }

    #[tokio::test]
    async fn wrong_code_is_unauthorized_and_connection_stays_pending() {
        let (state, _) = linking_state();
        let app = test_app(state);
        get_json(&app, "/link?cid=c1").await;

        let response = app
            .clone()
            .oneshot(post_link(
                json!({"connection_id": "c1", "code": "lc_wrong", "user_id": "42"}),
                Some(LINK_SECRET),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(get_json(&app, "/whoami?cid=c1").await["linked"], false);
    }

    #[tokio::test]
    async fn linked_connection_cannot_be_relinked() {
        let (state, _) = linking_state();
        let app = test_app(state);
        let code = get_json(&app, "/link?cid=c1").await["link_code"]
            .as_str()
            .unwrap()
            .to_string();
        let response = app
            .clone()
            .oneshot(post_link(
                json!({"connection_id": "c1", "code": code, "user_id": "42"}),
                Some(LINK_SECRET),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = get_json(&app, "/link?cid=c1").await;
        assert_eq!(body["status"], "linked");
        assert!(body.get("link_code").is_none());

        let response = app
            .clone()
            .oneshot(post_link(
                json!({"connection_id": "c1", "code": code, "user_id": "43"}),
                Some(LINK_SECRET),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(get_json(&app, "/whoami?cid=c1").await["user_id"], "42");
    }

    #[tokio::test]
    async fn fixed_identity_shows_in_whoami() {
        let (state, _) = stub_state(Some("stub"));
        let response = test_app(state)
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["linked"], true);
        assert_eq!(body["user_id"], "stub");
        assert_eq!(body["source"], "fixed");
    }
}
