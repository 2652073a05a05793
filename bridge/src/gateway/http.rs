use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{NaiveDate, Utc};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use stas_core::external_id::status_window;
use stas_core::plan::{Plan, PlanRecord};
use url::Url;

use super::{Gateway, GatewayError, PlanUpdate, WriteOutcome, record_from_event, training_date};

const SUMMARY_PATH: &str = "/api/db/user_summary";
const TRAININGS_PATH: &str = "/trainings";
const EVENTS_PATH: &str = "/icu/events";
const PLAN_CATEGORY: &str = "WORKOUT";

/// Per-user gateway credential used when no `BRIDGE_TOKEN` is configured:
/// `Bearer t_<base64url({"uid": user})>` without padding.
pub fn bearer_for_user(user_id: &str) -> String {
    let uid = match user_id.parse::<i64>() {
        Ok(n) => json!(n),
        Err(_) => json!(user_id),
    };
    let payload = json!({ "uid": uid }).to_string();
    format!("Bearer t_{}", URL_SAFE_NO_PAD.encode(payload.as_bytes()))
}

/// Gateway client over HTTP. One attempt per call: failures surface as
/// [`GatewayError`] and are never retried here.
#[derive(Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

struct GatewayResponse {
    status: StatusCode,
    body: Value,
}

impl HttpGateway {
    pub fn new(base: Url, token: Option<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
                timed_out: false,
            })?;
        Ok(Self { http, base, token })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        Url::parse(&format!("{}{}", self.base.as_str().trim_end_matches('/'), path))
            .map_err(|e| GatewayError::BadPayload(format!("invalid gateway URL for {path}: {e}")))
    }

    fn authorization(&self, user_id: &str) -> String {
        match &self.token {
            Some(token) => format!("Bearer {token}"),
            None => bearer_for_user(user_id),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        user_id: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        if_match: Option<&str>,
    ) -> Result<GatewayResponse, GatewayError> {
        let mut url = self.endpoint(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("user_id", user_id);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut request = self
            .http
            .request(method.clone(), url)
            .header("Authorization", self.authorization(user_id))
            .header("Accept", "application/json");
        if let Some(etag) = if_match {
            request = request.header("If-Match", etag);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(
                event = "gateway_unavailable",
                method = %method,
                path,
                error = %e,
                "gateway request failed"
            );
            GatewayError::Unavailable {
                message: format!("failed to reach gateway: {e}"),
                timed_out: e.is_timeout(),
            }
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| GatewayError::Unavailable {
            message: format!("failed to read gateway response: {e}"),
            timed_out: e.is_timeout(),
        })?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(body) => body,
                Err(e) if status.is_success() => {
                    tracing::warn!(
                        event = "gateway_bad_payload",
                        method = %method,
                        path,
                        status = status.as_u16(),
                        error = %e,
                        "gateway sent a non-JSON success body"
                    );
                    return Err(GatewayError::BadPayload(format!(
                        "invalid JSON from gateway: {e}"
                    )));
                }
                // Error pages are kept as text for the rejection message.
                Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            }
        };

        tracing::debug!(
            event = "gateway_response",
            method = %method,
            path,
            status = status.as_u16(),
            "gateway responded"
        );
        Ok(GatewayResponse { status, body })
    }

    async fn events_query(
        &self,
        user_id: &str,
        query: &[(&str, String)],
    ) -> Result<Option<Vec<Value>>, GatewayError> {
        let response = self
            .send(Method::GET, EVENTS_PATH, user_id, query, None, None)
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = expect_success(response)?;
        list_of_objects(body, "plan events").map(Some)
    }
}

fn expect_success(response: GatewayResponse) -> Result<Value, GatewayError> {
    if response.status.is_success() {
        return Ok(response.body);
    }
    let message = ["message", "error", "detail"]
        .iter()
        .find_map(|key| response.body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| {
            response
                .status
                .canonical_reason()
                .unwrap_or("gateway error")
                .to_string()
        });
    Err(GatewayError::Rejected {
        status: response.status.as_u16(),
        message,
        payload: (!response.body.is_null()).then_some(response.body),
    })
}

fn list_of_objects(body: Value, what: &str) -> Result<Vec<Value>, GatewayError> {
    let Value::Array(items) = body else {
        return Err(GatewayError::BadPayload(format!("{what} must be a list")));
    };
    if items.iter().any(|item| !item.is_object()) {
        return Err(GatewayError::BadPayload(format!("{what} entries must be objects")));
    }
    Ok(items)
}

fn window_query(oldest: NaiveDate, newest: NaiveDate) -> Vec<(&'static str, String)> {
    vec![
        ("oldest", oldest.format("%Y-%m-%d").to_string()),
        ("newest", newest.format("%Y-%m-%d").to_string()),
    ]
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn get_summary(&self, user_id: &str) -> Result<Value, GatewayError> {
        let response = self
            .send(Method::GET, SUMMARY_PATH, user_id, &[], None, None)
            .await?;
        let body = expect_success(response)?;
        if !body.is_object() {
            return Err(GatewayError::BadPayload(
                "user summary must be an object".to_string(),
            ));
        }
        Ok(body)
    }

    async fn get_trainings(
        &self,
        user_id: &str,
        oldest: NaiveDate,
        newest: NaiveDate,
    ) -> Result<Vec<Value>, GatewayError> {
        if oldest > newest {
            return Ok(Vec::new());
        }
        let response = self
            .send(
                Method::GET,
                TRAININGS_PATH,
                user_id,
                &window_query(oldest, newest),
                None,
                None,
            )
            .await?;
        let trainings = list_of_objects(expect_success(response)?, "trainings")?;
        Ok(trainings
            .into_iter()
            .filter(|t| training_date(t).is_none_or(|day| day <= newest))
            .collect())
    }

    async fn write_plan(
        &self,
        user_id: &str,
        plan: &Plan,
        external_id_prefix: &str,
    ) -> Result<WriteOutcome, GatewayError> {
        let body = serde_json::to_value(plan)
            .map_err(|e| GatewayError::BadPayload(format!("plan is not serializable: {e}")))?;
        let query = [
            ("external_id_prefix", external_id_prefix.to_string()),
            ("dry_run", "false".to_string()),
        ];
        let response = self
            .send(Method::POST, EVENTS_PATH, user_id, &query, Some(&body), None)
            .await?;
        let body = expect_success(response)?;

        let reported = ["days_written", "count"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_u64));
        let days_written = reported.unwrap_or(plan.days.len() as u64);
        Ok(WriteOutcome {
            days_written: u32::try_from(days_written).unwrap_or(u32::MAX),
        })
    }

    async fn delete_plan(&self, user_id: &str, external_id: &str) -> Result<(), GatewayError> {
        let query = [("external_id", external_id.to_string())];
        let response = self
            .send(Method::DELETE, EVENTS_PATH, user_id, &query, None, None)
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            tracing::info!(
                event = "gateway_delete_missing",
                external_id,
                "plan already absent at gateway"
            );
            return Ok(());
        }
        expect_success(response).map(|_| ())
    }

    async fn get_plan(
        &self,
        user_id: &str,
        external_id: &str,
    ) -> Result<Option<PlanRecord>, GatewayError> {
        let by_id = [
            ("category", PLAN_CATEGORY.to_string()),
            ("external_id", external_id.to_string()),
        ];
        let events = match self.events_query(user_id, &by_id).await {
            Ok(Some(events)) => Some(events),
            Ok(None) => return Ok(None),
            // Older gateways reject the external_id filter; scan a window instead.
            Err(err) if err.status().is_some_and(|status| status < 500) => None,
            Err(err) => return Err(err),
        };

        let events = match events {
            Some(events) => events,
            None => {
                let (oldest, newest) = status_window(external_id, Utc::now().date_naive());
                let mut query = window_query(oldest, newest);
                query.push(("category", PLAN_CATEGORY.to_string()));
                match self.events_query(user_id, &query).await? {
                    Some(events) => events,
                    None => return Ok(None),
                }
            }
        };

        Ok(events
            .iter()
            .filter_map(record_from_event)
            .find(|record| record.external_id == external_id))
    }

    async fn update_plan(&self, user_id: &str, update: &PlanUpdate) -> Result<Value, GatewayError> {
        let query = [
            ("external_id_prefix", "plan:".to_string()),
            ("dry_run", update.dry_run.to_string()),
        ];
        let body = json!({
            "external_id": update.external_id,
            "patch": update.patch,
        });
        let response = self
            .send(
                Method::POST,
                EVENTS_PATH,
                user_id,
                &query,
                Some(&body),
                update.if_match.as_deref(),
            )
            .await?;
        let body = expect_success(response)?;
        if !body.is_object() {
            return Err(GatewayError::BadPayload(
                "plan update response must be an object".to_string(),
            ));
        }
        Ok(body)
    }

    async fn list_plans(
        &self,
        user_id: &str,
        oldest: NaiveDate,
        newest: NaiveDate,
    ) -> Result<Vec<PlanRecord>, GatewayError> {
        let mut query = window_query(oldest, newest);
        query.push(("category", PLAN_CATEGORY.to_string()));
        let events = self.events_query(user_id, &query).await?.unwrap_or_default();
        Ok(events
            .iter()
            .filter_map(record_from_event)
            .filter(|record| record.external_id.starts_with("plan:"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use stas_core::plan::Day;

    use super::*;

    /// In-process fake of the gateway's plan endpoints. Keyed by external_id,
    /// so repeated writes overwrite instead of duplicating.
    #[derive(Clone, Default)]
    struct FakeGateway {
        plans: Arc<Mutex<HashMap<String, Value>>>,
        seen_external_ids: Arc<Mutex<Vec<String>>>,
        seen_auth: Arc<Mutex<Vec<String>>>,
    }

    async fn write_events(
        State(fake): State<FakeGateway>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        fake.seen_auth.lock().unwrap().push(auth);
        assert_eq!(query.get("external_id_prefix").map(String::as_str), Some("plan:"));
        let external_id = body["external_id"].as_str().unwrap().to_string();
        fake.seen_external_ids.lock().unwrap().push(external_id.clone());
        let count = body["days"].as_array().map(Vec::len).unwrap_or(0);
        fake.plans.lock().unwrap().insert(external_id, body);
        Json(json!({ "updated": true, "count": count }))
    }

    async fn delete_events(
        State(fake): State<FakeGateway>,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        let external_id = query.get("external_id").cloned().unwrap_or_default();
        match fake.plans.lock().unwrap().remove(&external_id) {
            Some(_) => (AxumStatus::OK, Json(json!({ "deleted": true }))),
            None => (AxumStatus::NOT_FOUND, Json(json!({ "error": "not found" }))),
        }
    }

    async fn list_events(
        State(fake): State<FakeGateway>,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        let plans = fake.plans.lock().unwrap();
        let events: Vec<Value> = plans
            .iter()
            .filter(|(id, _)| query.get("external_id").is_none_or(|wanted| wanted == *id))
            .map(|(id, body)| json!({ "external_id": id, "payload": body, "updated_at": "2025-11-01T00:00:00Z" }))
            .collect();
        Json(Value::Array(events))
    }

    async fn trainings(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
        assert!(query.contains_key("oldest") && query.contains_key("newest"));
        Json(json!([
            { "id": 1, "date": "2025-11-01" },
            { "id": 2, "date": "2025-11-02" },
            { "id": 3, "date": "2099-01-01" }
        ]))
    }

    async fn failing_summary() -> impl IntoResponse {
        (
            AxumStatus::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "maintenance" })),
        )
    }

    async fn spawn_fake(fake: FakeGateway) -> Url {
        let app = Router::new()
            .route(
                EVENTS_PATH,
                get(list_events).post(write_events).delete(delete_events),
            )
            .route(TRAININGS_PATH, get(trainings))
            .route(SUMMARY_PATH, get(failing_summary))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn gateway(base: Url, token: Option<&str>) -> HttpGateway {
        HttpGateway::new(base, token.map(str::to_string), Duration::from_secs(5)).unwrap()
    }

    fn plan() -> Plan {
        Plan {
            external_id: "plan:2025-w45".to_string(),
            athlete_id: "a1".to_string(),
            meta: Default::default(),
            days: vec![Day {
                date: "2025-11-03".to_string(),
                title: "Long run".to_string(),
                blocks: vec![],
                extra: Default::default(),
            }],
        }
    }

    #[test]
    fn bearer_for_user_encodes_uid_without_padding() {
        let bearer = bearer_for_user("1");
        assert_eq!(bearer, "Bearer t_eyJ1aWQiOjF9");
        assert!(!bearer.ends_with('='));
        assert!(bearer_for_user("athlete-7").starts_with("Bearer t_"));
    }

    #[tokio::test]
    async fn repeated_write_keeps_key_and_creates_one_record() {
        let fake = FakeGateway::default();
        let gateway = gateway(spawn_fake(fake.clone()).await, Some("secret"));

        let first = gateway.write_plan("42", &plan(), "plan:").await.unwrap();
        let second = gateway.write_plan("42", &plan(), "plan:").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.days_written, 1);
        assert_eq!(fake.plans.lock().unwrap().len(), 1);
        assert_eq!(
            *fake.seen_external_ids.lock().unwrap(),
            vec!["plan:2025-w45".to_string(), "plan:2025-w45".to_string()]
        );
        assert!(
            fake.seen_auth
                .lock()
                .unwrap()
                .iter()
                .all(|auth| auth == "Bearer secret")
        );
    }

    #[tokio::test]
    async fn write_without_token_uses_per_user_bearer() {
        let fake = FakeGateway::default();
        let gateway = gateway(spawn_fake(fake.clone()).await, None);
        gateway.write_plan("1", &plan(), "plan:").await.unwrap();
        assert_eq!(
            fake.seen_auth.lock().unwrap().as_slice(),
            ["Bearer t_eyJ1aWQiOjF9".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_of_missing_plan_succeeds() {
        let fake = FakeGateway::default();
        let gateway = gateway(spawn_fake(fake.clone()).await, None);

        gateway.write_plan("42", &plan(), "plan:").await.unwrap();
        gateway.delete_plan("42", "plan:2025-w45").await.unwrap();
        gateway.delete_plan("42", "plan:2025-w45").await.unwrap();
        gateway.delete_plan("42", "plan:never-existed").await.unwrap();
        assert!(fake.plans.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_plan_finds_published_record() {
        let fake = FakeGateway::default();
        let gateway = gateway(spawn_fake(fake.clone()).await, None);

        assert!(gateway.get_plan("42", "plan:2025-w45").await.unwrap().is_none());
        gateway.write_plan("42", &plan(), "plan:").await.unwrap();
        let record = gateway
            .get_plan("42", "plan:2025-w45")
            .await
            .unwrap()
            .expect("published plan should be found");
        assert_eq!(record.payload["days"][0]["title"], "Long run");
        assert_eq!(record.updated_at.as_deref(), Some("2025-11-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn trainings_drop_future_entries_and_skip_empty_ranges() {
        let gateway = gateway(spawn_fake(FakeGateway::default()).await, None);
        let oldest = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap();
        let newest = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();

        let items = gateway.get_trainings("42", oldest, newest).await.unwrap();
        let ids: Vec<i64> = items.iter().filter_map(|t| t["id"].as_i64()).collect();
        assert_eq!(ids, vec![1, 2]);

        let empty = gateway.get_trainings("42", newest, oldest).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_surfaces_as_gateway_error() {
        let gateway = gateway(spawn_fake(FakeGateway::default()).await, None);
        let err = gateway.get_summary("42").await.unwrap_err();
        match err {
            GatewayError::Rejected {
                status, message, ..
            } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    async fn proxy_page() -> impl IntoResponse {
        (
            [("content-type", "text/html")],
            "<html>proxy error page</html>",
        )
    }

    #[tokio::test]
    async fn success_with_non_json_body_is_bad_payload() {
        let app = Router::new().route(EVENTS_PATH, get(proxy_page).post(proxy_page).delete(proxy_page));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let gateway = gateway(Url::parse(&format!("http://{addr}/")).unwrap(), None);

        let err = gateway.write_plan("42", &plan(), "plan:").await.unwrap_err();
        assert!(matches!(err, GatewayError::BadPayload(_)), "{err:?}");
        let err = gateway.delete_plan("42", "plan:2025-w45").await.unwrap_err();
        assert!(matches!(err, GatewayError::BadPayload(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_gateway_is_unavailable() {
        let gateway = HttpGateway::new(
            Url::parse("http://127.0.0.1:9").unwrap(),
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = gateway.get_summary("42").await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { .. }));
    }
}
