//! Plan validator: structural errors block a publish, domain concerns are
//! reported as warnings. Pure; never touches the draft or the gateway.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde_json::{Map, Value, json};

use crate::external_id::PLAN_PREFIX;
use crate::plan::ValidationResult;

pub fn validate(draft: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(obj) = draft.as_object() else {
        errors.push("draft must be an object".to_string());
        return ValidationResult::from_findings(errors, warnings);
    };

    match obj.get("external_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {
            if !id.trim().starts_with(PLAN_PREFIX) {
                warnings.push(format!(
                    "external_id '{id}' has no '{PLAN_PREFIX}' prefix; it will be normalized"
                ));
            }
        }
        Some(Value::String(_)) => errors.push("external_id must not be empty".to_string()),
        Some(_) => errors.push("external_id must be a string".to_string()),
        None => errors.push("external_id is required".to_string()),
    }

    match obj.get("athlete_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        Some(Value::String(_)) => errors.push("athlete_id must not be empty".to_string()),
        Some(_) => errors.push("athlete_id must be a string".to_string()),
        None => errors.push("athlete_id is required".to_string()),
    }

    if let Some(meta) = obj.get("meta") {
        if !meta.is_object() && !meta.is_null() {
            errors.push("meta must be an object".to_string());
        }
    }

    match obj.get("days") {
        Some(Value::Array(days)) => check_days(days, &mut errors, &mut warnings),
        Some(_) => errors.push("days must be an array".to_string()),
        None => errors.push("days is required".to_string()),
    }

    ValidationResult::from_findings(errors, warnings)
}

fn check_days(days: &[Value], errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    if days.is_empty() {
        warnings.push("days is empty; publishing writes nothing".to_string());
        return;
    }

    let mut seen = HashSet::new();
    let mut previous: Option<NaiveDate> = None;
    let mut out_of_order = false;

    for (index, day) in days.iter().enumerate() {
        let Some(day) = day.as_object() else {
            errors.push(format!("days[{index}] must be an object"));
            continue;
        };

        match day.get("date") {
            Some(Value::String(raw)) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                Ok(date) => {
                    if !seen.insert(date) {
                        warnings.push(format!("days[{index}].date {raw} appears more than once"));
                    }
                    if previous.is_some_and(|prev| date < prev) {
                        out_of_order = true;
                    }
                    previous = Some(date);
                }
                Err(_) => errors.push(format!(
                    "days[{index}].date must be an ISO date (YYYY-MM-DD), got '{raw}'"
                )),
            },
            Some(_) => errors.push(format!("days[{index}].date must be a string")),
            None => errors.push(format!("days[{index}].date is required")),
        }

        match day.get("title") {
            Some(Value::String(title)) if !title.trim().is_empty() => {}
            Some(Value::String(_)) => errors.push(format!("days[{index}].title must not be empty")),
            Some(_) => errors.push(format!("days[{index}].title must be a string")),
            None => errors.push(format!("days[{index}].title is required")),
        }

        match day.get("blocks") {
            Some(Value::Array(blocks)) => {
                for (block_index, block) in blocks.iter().enumerate() {
                    if !block.is_object() {
                        errors.push(format!(
                            "days[{index}].blocks[{block_index}] must be an object"
                        ));
                    }
                }
            }
            Some(_) => errors.push(format!("days[{index}].blocks must be an array")),
            None => errors.push(format!("days[{index}].blocks is required")),
        }
    }

    if out_of_order {
        warnings.push("days are not in chronological order".to_string());
    }
}

/// Describe how `draft` differs from a previously published plan body.
///
/// Days are matched by date; the first day wins when a date repeats.
pub fn diff(prior: &Value, draft: &Value) -> Map<String, Value> {
    let before = days_by_date(prior);
    let after = days_by_date(draft);

    let added: Vec<&str> = after
        .keys()
        .filter(|date| !before.contains_key(*date))
        .map(String::as_str)
        .collect();
    let removed: Vec<&str> = before
        .keys()
        .filter(|date| !after.contains_key(*date))
        .map(String::as_str)
        .collect();
    let changed: Vec<&str> = after
        .iter()
        .filter(|(date, day)| before.get(*date).is_some_and(|old| old != *day))
        .map(|(date, _)| date.as_str())
        .collect();

    let empty = Value::Object(Map::new());
    let meta_before = prior.get("meta").filter(|m| !m.is_null()).unwrap_or(&empty);
    let meta_after = draft.get("meta").filter(|m| !m.is_null()).unwrap_or(&empty);

    let mut out = Map::new();
    out.insert("days_added".to_string(), json!(added));
    out.insert("days_removed".to_string(), json!(removed));
    out.insert("days_changed".to_string(), json!(changed));
    out.insert("meta_changed".to_string(), json!(meta_before != meta_after));
    out
}

fn days_by_date(plan: &Value) -> BTreeMap<String, &Value> {
    let mut out = BTreeMap::new();
    let Some(days) = plan.get("days").and_then(Value::as_array) else {
        return out;
    };
    for day in days {
        if let Some(date) = day.get("date").and_then(Value::as_str) {
            out.entry(date.to_string()).or_insert(day);
        }
    }
    out
}
