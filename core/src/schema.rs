use std::sync::LazyLock;

use serde_json::{Value, json};

pub const JSON_SCHEMA_URI: &str = "http://json-schema.org/draft-07/schema#";

static PLAN_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": JSON_SCHEMA_URI,
        "$id": "schema.plan.json",
        "title": "Training plan draft",
        "type": "object",
        "required": ["external_id", "athlete_id", "days"],
        "properties": {
            "external_id": {
                "type": "string",
                "description": "Stable plan key, format plan:<token>. Idempotency key for publish/delete."
            },
            "athlete_id": { "type": "string" },
            "meta": { "type": ["object", "null"] },
            "days": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["date", "title", "blocks"],
                    "properties": {
                        "date": { "type": "string", "format": "date" },
                        "title": { "type": "string" },
                        "blocks": { "type": "array", "items": { "type": "object" } }
                    }
                }
            }
        }
    })
});

/// The static plan schema served as `schema.plan.json` and embedded in tool
/// input schemas. Identical on every call.
pub fn plan_schema() -> &'static Value {
    &PLAN_SCHEMA
}
