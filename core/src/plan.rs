use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// A training plan as forwarded to the gateway.
///
/// Plans are transient: built from a validated draft, written through the
/// gateway and dropped. `external_id` is the idempotency key for publish and
/// delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Plan {
    /// Stable client-chosen key, `plan:<token>`
    pub external_id: String,
    pub athlete_id: String,
    /// Free-form plan metadata; `null` reads as empty
    #[serde(
        default,
        deserialize_with = "null_as_empty_map",
        skip_serializing_if = "Map::is_empty"
    )]
    #[schema(value_type = Object)]
    pub meta: Map<String, Value>,
    /// Ordered plan days
    pub days: Vec<Day>,
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Plan {
    /// Build a typed plan from a draft that already passed validation.
    pub fn from_draft(draft: &Value) -> Result<Self, serde_json::Error> {
        Plan::deserialize(draft)
    }
}

/// One plan day. Blocks are opaque and only checked structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Day {
    /// ISO date (YYYY-MM-DD)
    pub date: String,
    pub title: String,
    #[schema(value_type = Vec<Object>)]
    pub blocks: Vec<Value>,
    /// Any extra day fields are passed through untouched
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: Map<String, Value>,
}

/// Outcome of `plan.validate`. `ok` is true iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Changes relative to the previously published version, when known
    #[schema(value_type = Object)]
    pub diff: Map<String, Value>,
}

impl ValidationResult {
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
            warnings,
            diff: Map::new(),
        }
    }
}

/// A plan as the gateway reports it back (lookup, listing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub external_id: String,
    /// Stored plan body (`days`, `meta`, ...)
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub athlete_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default = "default_record_status")]
    pub status: String,
}

fn default_record_status() -> String {
    "published".to_string()
}

// --- Tool request bodies ---

/// `confirm` is kept as raw JSON: anything but a literal `true` is "not confirmed".
fn is_confirmed(confirm: &Option<Value>) -> bool {
    matches!(confirm, Some(Value::Bool(true)))
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PublishRequest {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub draft: Value,
    #[serde(default)]
    #[schema(value_type = Option<bool>)]
    pub confirm: Option<Value>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

impl PublishRequest {
    pub fn confirmed(&self) -> bool {
        is_confirmed(&self.confirm)
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct DeleteRequest {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<bool>)]
    pub confirm: Option<Value>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

impl DeleteRequest {
    pub fn confirmed(&self) -> bool {
        is_confirmed(&self.confirm)
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateRequest {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub patch: Value,
    #[serde(default)]
    #[schema(value_type = Option<bool>)]
    pub confirm: Option<Value>,
    #[serde(default)]
    pub if_match: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

impl UpdateRequest {
    pub fn confirmed(&self) -> bool {
        is_confirmed(&self.confirm)
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct StatusRequest {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ListRequest {
    #[serde(default)]
    pub athlete_id: Option<String>,
    /// Start date (YYYY-MM-DD)
    #[serde(default)]
    pub date_from: Option<String>,
    /// End date (YYYY-MM-DD)
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// `plan.validate` accepts the draft itself or a `{draft: {...}}` wrapper.
pub fn draft_from_validate_body(body: Value) -> Value {
    match body {
        Value::Object(mut map) if !map.contains_key("days") && map.contains_key("draft") => {
            map.remove("draft").unwrap_or(Value::Null)
        }
        other => other,
    }
}

// --- Tool responses ---

/// Two-phase gate response: mutating tools never act without `confirm:true`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NeedConfirmResponse {
    pub ok: bool,
    pub need_confirm: bool,
    pub hint: String,
}

impl Default for NeedConfirmResponse {
    fn default() -> Self {
        Self {
            ok: false,
            need_confirm: true,
            hint: "Add confirm:true".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublishResponse {
    pub ok: bool,
    pub external_id: String,
    pub status: String,
    pub days_written: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub ok: bool,
    pub external_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum UpdateResponse {
    Preview {
        ok: bool,
        external_id: String,
        external_id_normalized: String,
        would_change: bool,
        #[schema(value_type = Object)]
        diff: Value,
    },
    Applied {
        ok: bool,
        external_id: String,
        external_id_normalized: String,
        updated: bool,
        etag: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusResponse {
    pub ok: bool,
    pub external_id: String,
    /// "published" or "missing"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlanSummary {
    pub external_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub athlete_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<&PlanRecord> for PlanSummary {
    fn from(record: &PlanRecord) -> Self {
        Self {
            external_id: record.external_id.clone(),
            status: record.status.clone(),
            athlete_id: record.athlete_id.clone(),
            etag: crate::etag::payload_etag(&record.payload),
            updated_at: record.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ListResponse {
    pub ok: bool,
    pub items: Vec<PlanSummary>,
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn confirm_only_accepts_literal_true() {
        let parse = |body: Value| serde_json::from_value::<PublishRequest>(body).unwrap();
        assert!(parse(json!({"confirm": true})).confirmed());
        assert!(!parse(json!({"confirm": false})).confirmed());
        assert!(!parse(json!({"confirm": "true"})).confirmed());
        assert!(!parse(json!({"confirm": 1})).confirmed());
        assert!(!parse(json!({})).confirmed());
    }

    #[test]
    fn validate_body_unwraps_draft_wrapper() {
        let draft = json!({"external_id": "plan:x", "days": []});
        assert_eq!(
            draft_from_validate_body(json!({"draft": draft.clone()})),
            draft
        );
        assert_eq!(draft_from_validate_body(draft.clone()), draft);
    }

    #[test]
    fn plan_from_draft_keeps_extra_day_fields() {
        let plan = Plan::from_draft(&json!({
            "external_id": "plan:2025-w45",
            "athlete_id": "a1",
            "days": [{"date": "2025-11-03", "title": "Long run", "blocks": [], "notes": "easy"}]
        }))
        .unwrap();
        assert!(plan.meta.is_empty());
        assert_eq!(plan.days[0].extra.get("notes"), Some(&json!("easy")));
    }

    #[test]
    fn plan_from_draft_reads_null_meta_as_empty() {
        let plan = Plan::from_draft(&json!({
            "external_id": "plan:2025-w45",
            "athlete_id": "a1",
            "meta": null,
            "days": []
        }))
        .unwrap();
        assert!(plan.meta.is_empty());
        assert!(!serde_json::to_value(&plan).unwrap().as_object().unwrap().contains_key("meta"));
    }

    #[test]
    fn need_confirm_response_shape() {
        assert_eq!(
            serde_json::to_value(NeedConfirmResponse::default()).unwrap(),
            json!({"ok": false, "need_confirm": true, "hint": "Add confirm:true"})
        );
    }
}
