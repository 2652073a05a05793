use std::sync::LazyLock;

use chrono::{Duration, NaiveDate};
use regex::Regex;

pub const PLAN_PREFIX: &str = "plan:";

static DATED_PLAN_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^plan:(\d{4}-\d{2}-\d{2})(?::.*)?$").expect("dated plan id pattern is valid")
});

/// Normalize a caller-provided external id into the key sent to the gateway.
///
/// Blank ids become `plan:auto`; ids without the `plan:` prefix get it.
pub fn normalize_external_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return format!("{PLAN_PREFIX}auto");
    }
    if trimmed.starts_with(PLAN_PREFIX) {
        return trimmed.to_string();
    }
    let slug = trimmed.trim_start_matches(':');
    if slug.is_empty() {
        format!("{PLAN_PREFIX}auto")
    } else {
        format!("{PLAN_PREFIX}{slug}")
    }
}

/// Inclusive date window to scan when looking a plan up by id.
///
/// `plan:YYYY-MM-DD[:...]` ids pin the window to that day; anything else
/// scans the last 90 days and the coming week.
pub fn status_window(external_id: &str, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    if let Some(day) = DATED_PLAN_ID
        .captures(external_id)
        .and_then(|caps| caps.get(1))
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
    {
        return (day, day);
    }
    (today - Duration::days(90), today + Duration::days(7))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_prefix_once() {
        assert_eq!(normalize_external_id("week-42"), "plan:week-42");
        assert_eq!(normalize_external_id("plan:2025-w45"), "plan:2025-w45");
        assert_eq!(normalize_external_id("  plan:x "), "plan:x");
        assert_eq!(normalize_external_id(":x"), "plan:x");
    }

    #[test]
    fn normalize_blank_falls_back_to_auto() {
        assert_eq!(normalize_external_id(""), "plan:auto");
        assert_eq!(normalize_external_id("   "), "plan:auto");
        assert_eq!(normalize_external_id(":::"), "plan:auto");
    }

    #[test]
    fn status_window_pins_dated_ids() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        assert_eq!(status_window("plan:2025-11-03:long-run", today), (day, day));
        assert_eq!(status_window("plan:2025-11-03", today), (day, day));
    }

    #[test]
    fn status_window_defaults_to_recent_range() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        let (oldest, newest) = status_window("plan:2025-w45", today);
        assert_eq!(oldest, NaiveDate::from_ymd_opt(2025, 8, 3).unwrap());
        assert_eq!(newest, NaiveDate::from_ymd_opt(2025, 11, 8).unwrap());
    }
}
