//! Gateway capability: the only way the bridge reads or writes athlete data.
//!
//! Two implementations exist: [`HttpGateway`] talks to the real STAS gateway,
//! [`StubGateway`] serves canned data in stub mode and doubles as the
//! idempotence-enforcing fake in tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use stas_core::plan::{Plan, PlanRecord};

mod http;
mod stub;

pub use http::HttpGateway;
pub use stub::StubGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unavailable: {message}")]
    Unavailable { message: String, timed_out: bool },
    #[error("gateway responded with {status}: {message}")]
    Rejected {
        status: u16,
        message: String,
        payload: Option<Value>,
    },
    #[error("gateway returned an invalid payload: {0}")]
    BadPayload(String),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub days_written: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanUpdate {
    /// Normalized external id
    pub external_id: String,
    pub patch: Value,
    pub dry_run: bool,
    pub if_match: Option<String>,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn get_summary(&self, user_id: &str) -> Result<Value, GatewayError>;

    /// Completed trainings with `oldest..=newest`. An empty range yields `[]`.
    async fn get_trainings(
        &self,
        user_id: &str,
        oldest: NaiveDate,
        newest: NaiveDate,
    ) -> Result<Vec<Value>, GatewayError>;

    /// Write keyed by `plan.external_id`. Repeating an identical write must
    /// not create a second record.
    async fn write_plan(
        &self,
        user_id: &str,
        plan: &Plan,
        external_id_prefix: &str,
    ) -> Result<WriteOutcome, GatewayError>;

    /// Deleting an id that does not exist succeeds.
    async fn delete_plan(&self, user_id: &str, external_id: &str) -> Result<(), GatewayError>;

    async fn get_plan(
        &self,
        user_id: &str,
        external_id: &str,
    ) -> Result<Option<PlanRecord>, GatewayError>;

    async fn update_plan(&self, user_id: &str, update: &PlanUpdate) -> Result<Value, GatewayError>;

    async fn list_plans(
        &self,
        user_id: &str,
        oldest: NaiveDate,
        newest: NaiveDate,
    ) -> Result<Vec<PlanRecord>, GatewayError>;
}

/// Calendar date of a training entry (`date`, `start_date` or `start_at`).
pub fn training_date(training: &Value) -> Option<NaiveDate> {
    ["date", "start_date", "start_at"]
        .iter()
        .filter_map(|key| training.get(*key).and_then(Value::as_str))
        .find(|raw| !raw.is_empty())
        .and_then(|raw| raw.get(..10))
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
}

/// Build a plan record from a gateway calendar event.
pub(crate) fn record_from_event(event: &Value) -> Option<PlanRecord> {
    let external_id = event.get("external_id")?.as_str()?.to_string();
    let payload = match event.get("payload") {
        Some(payload @ (Value::Object(_) | Value::Array(_))) => payload.clone(),
        _ => event.clone(),
    };
    let updated_at = ["updated_at", "modified_at", "created_at", "start_date_local"]
        .iter()
        .find_map(|key| event.get(*key).and_then(Value::as_str))
        .map(str::to_string);
    Some(PlanRecord {
        external_id,
        payload,
        athlete_id: event
            .get("athlete_id")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string()))),
        updated_at,
        status: event
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("published")
            .to_string(),
    })
}
