use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde_json::{Map, Value, json};
use stas_core::etag::payload_etag;
use stas_core::plan::{Plan, PlanRecord};
use stas_core::validate::diff;

use super::{Gateway, GatewayError, PlanUpdate, WriteOutcome, training_date};

/// In-memory gateway for stub mode and tests.
///
/// Plans are keyed by `(user_id, external_id)`: writing the same key again
/// replaces the stored record, so repeated publishes never duplicate.
#[derive(Debug, Default)]
pub struct StubGateway {
    plans: Mutex<HashMap<(String, String), PlanRecord>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl StubGateway {
    /// Number of `write_plan` calls that reached the gateway.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn plan_count(&self) -> usize {
        self.lock().len()
    }
}

impl StubGateway {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), PlanRecord>> {
        self.plans.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn days_ago(today: NaiveDate, n: u64) -> String {
    today
        .checked_sub_days(Days::new(n))
        .unwrap_or(today)
        .format("%Y-%m-%d")
        .to_string()
}

fn canned_trainings(today: NaiveDate) -> Vec<Value> {
    vec![
        json!({ "id": "stub-1", "date": days_ago(today, 5), "type": "run", "title": "Easy run", "distance_km": 8.0, "duration_min": 45 }),
        json!({ "id": "stub-2", "date": days_ago(today, 3), "type": "bike", "title": "Endurance ride", "distance_km": 40.0, "duration_min": 90 }),
        json!({ "id": "stub-3", "date": days_ago(today, 1), "type": "run", "title": "Intervals 6x800", "distance_km": 10.0, "duration_min": 55 }),
        json!({
            "id": "stub-planned",
            "date": today.checked_add_days(Days::new(2)).unwrap_or(today).format("%Y-%m-%d").to_string(),
            "type": "run",
            "title": "Planned long run"
        }),
    ]
}

fn merge_patch(payload: &Value, patch: &Value) -> Value {
    match (payload, patch) {
        (Value::Object(base), Value::Object(changes)) => {
            let mut merged: Map<String, Value> = base.clone();
            for (key, value) in changes {
                if value.is_null() {
                    merged.remove(key);
                } else {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}

#[async_trait]
impl Gateway for StubGateway {
    async fn get_summary(&self, user_id: &str) -> Result<Value, GatewayError> {
        let today = Utc::now().date_naive();
        Ok(json!({
            "user_id": user_id,
            "mode": "stub",
            "athlete": { "name": "Stub Athlete", "sport": "running" },
            "week": {
                "start": days_ago(today, 6),
                "end": today.format("%Y-%m-%d").to_string(),
                "sessions": 3,
                "distance_km": 58.0,
                "duration_min": 190
            },
            "load": { "ctl": 42.0, "atl": 48.5, "tsb": -6.5 }
        }))
    }

    async fn get_trainings(
        &self,
        _user_id: &str,
        oldest: NaiveDate,
        newest: NaiveDate,
    ) -> Result<Vec<Value>, GatewayError> {
        if oldest > newest {
            return Ok(Vec::new());
        }
        Ok(canned_trainings(Utc::now().date_naive())
            .into_iter()
            .filter(|t| training_date(t).is_some_and(|day| day >= oldest && day <= newest))
            .collect())
    }

    async fn write_plan(
        &self,
        user_id: &str,
        plan: &Plan,
        _external_id_prefix: &str,
    ) -> Result<WriteOutcome, GatewayError> {
        let writes = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = serde_json::to_value(plan)
            .map_err(|e| GatewayError::BadPayload(format!("plan is not serializable: {e}")))?;
        let record = PlanRecord {
            external_id: plan.external_id.clone(),
            payload,
            athlete_id: Some(plan.athlete_id.clone()),
            updated_at: Some(Utc::now().to_rfc3339()),
            status: "published".to_string(),
        };
        self.lock()
            .insert((user_id.to_string(), plan.external_id.clone()), record);
        tracing::debug!(
            event = "stub_plan_written",
            external_id = %plan.external_id,
            writes,
            "stub gateway stored plan"
        );
        Ok(WriteOutcome {
            days_written: u32::try_from(plan.days.len()).unwrap_or(u32::MAX),
        })
    }

    async fn delete_plan(&self, user_id: &str, external_id: &str) -> Result<(), GatewayError> {
        let deletes = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        let existed = self
            .lock()
            .remove(&(user_id.to_string(), external_id.to_string()))
            .is_some();
        tracing::debug!(
            event = "stub_plan_deleted",
            external_id,
            existed,
            deletes,
            "stub gateway delete"
        );
        Ok(())
    }

    async fn get_plan(
        &self,
        user_id: &str,
        external_id: &str,
    ) -> Result<Option<PlanRecord>, GatewayError> {
        Ok(self
            .lock()
            .get(&(user_id.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn update_plan(&self, user_id: &str, update: &PlanUpdate) -> Result<Value, GatewayError> {
        let key = (user_id.to_string(), update.external_id.clone());
        let mut plans = self.lock();
        let Some(record) = plans.get_mut(&key) else {
            return Err(GatewayError::Rejected {
                status: 404,
                message: format!("plan {} not found", update.external_id),
                payload: None,
            });
        };

        let current = payload_etag(&record.payload);
        if let Some(expected) = &update.if_match {
            if current.as_deref() != Some(expected.as_str()) {
                return Err(GatewayError::Rejected {
                    status: 409,
                    message: "etag mismatch".to_string(),
                    payload: Some(json!({ "etag_current": current })),
                });
            }
        }

        let merged = merge_patch(&record.payload, &update.patch);
        if update.dry_run {
            return Ok(json!({
                "would_change": merged != record.payload,
                "diff": diff(&record.payload, &merged),
            }));
        }

        record.payload = merged;
        record.updated_at = Some(Utc::now().to_rfc3339());
        Ok(json!({
            "updated": true,
            "etag": payload_etag(&record.payload),
        }))
    }

    async fn list_plans(
        &self,
        user_id: &str,
        oldest: NaiveDate,
        newest: NaiveDate,
    ) -> Result<Vec<PlanRecord>, GatewayError> {
        let plans = self.lock();
        Ok(plans
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|(_, record)| record)
            .filter(|record| {
                let first_day = record
                    .payload
                    .get("days")
                    .and_then(Value::as_array)
                    .and_then(|days| days.first())
                    .and_then(training_date);
                first_day.is_none_or(|day| day >= oldest && day <= newest)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use stas_core::plan::Day;

    use super::*;

    fn plan(title: &str) -> Plan {
        Plan {
            external_id: "plan:2025-w45".to_string(),
            athlete_id: "a1".to_string(),
            meta: Map::new(),
            days: vec![Day {
                date: "2025-11-03".to_string(),
                title: title.to_string(),
                blocks: vec![],
                extra: Map::new(),
            }],
        }
    }

    #[tokio::test]
    async fn same_key_overwrites_instead_of_duplicating() {
        let gateway = StubGateway::new();
        let first = gateway.write_plan("u1", &plan("Long run"), "plan:").await.unwrap();
        let second = gateway.write_plan("u1", &plan("Long run"), "plan:").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.plan_count(), 1);
        assert_eq!(gateway.write_calls(), 2);

        gateway.write_plan("u2", &plan("Long run"), "plan:").await.unwrap();
        assert_eq!(gateway.plan_count(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let gateway = StubGateway::new();
        gateway.write_plan("u1", &plan("Long run"), "plan:").await.unwrap();
        gateway.delete_plan("u1", "plan:2025-w45").await.unwrap();
        gateway.delete_plan("u1", "plan:2025-w45").await.unwrap();
        assert_eq!(gateway.plan_count(), 0);
        assert_eq!(gateway.delete_calls(), 2);
    }

    #[tokio::test]
    async fn trainings_exclude_future_sessions() {
        let gateway = StubGateway::new();
        let today = Utc::now().date_naive();
        let oldest = today.checked_sub_days(Days::new(14)).unwrap();
        let items = gateway.get_trainings("u1", oldest, today).await.unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|t| training_date(t).unwrap() <= today));

        let empty = gateway.get_trainings("u1", today, oldest).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn update_dry_run_leaves_plan_untouched() {
        let gateway = StubGateway::new();
        gateway.write_plan("u1", &plan("Long run"), "plan:").await.unwrap();
        let before = gateway.get_plan("u1", "plan:2025-w45").await.unwrap().unwrap();

        let preview = gateway
            .update_plan(
                "u1",
                &PlanUpdate {
                    external_id: "plan:2025-w45".to_string(),
                    patch: json!({ "meta": { "focus": "base" } }),
                    dry_run: true,
                    if_match: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(preview["would_change"], json!(true));
        assert_eq!(preview["diff"]["meta_changed"], json!(true));

        let after = gateway.get_plan("u1", "plan:2025-w45").await.unwrap().unwrap();
        assert_eq!(before.payload, after.payload);
    }

    #[tokio::test]
    async fn update_checks_if_match() {
        let gateway = StubGateway::new();
        gateway.write_plan("u1", &plan("Long run"), "plan:").await.unwrap();
        let record = gateway.get_plan("u1", "plan:2025-w45").await.unwrap().unwrap();
        let etag = payload_etag(&record.payload).unwrap();

        let stale = PlanUpdate {
            external_id: "plan:2025-w45".to_string(),
            patch: json!({ "meta": { "focus": "speed" } }),
            dry_run: false,
            if_match: Some("stale".to_string()),
        };
        match gateway.update_plan("u1", &stale).await.unwrap_err() {
            GatewayError::Rejected {
                status, payload, ..
            } => {
                assert_eq!(status, 409);
                assert_eq!(payload.unwrap()["etag_current"], json!(etag));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let fresh = PlanUpdate {
            if_match: Some(etag.clone()),
            ..stale
        };
        let applied = gateway.update_plan("u1", &fresh).await.unwrap();
        assert_eq!(applied["updated"], json!(true));
        assert_ne!(applied["etag"], json!(etag));
    }

    #[tokio::test]
    async fn update_of_missing_plan_is_not_found() {
        let gateway = StubGateway::new();
        let err = gateway
            .update_plan(
                "u1",
                &PlanUpdate {
                    external_id: "plan:nope".to_string(),
                    patch: json!({}),
                    dry_run: true,
                    if_match: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
