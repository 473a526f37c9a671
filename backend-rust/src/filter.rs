use chrono::{DateTime, NaiveDate, Utc};
use otdr_types::{Filter, Trace};

/// Parse a filter bound. Accepts RFC 3339 or a bare `YYYY-MM-DD` (UTC
/// midnight, what a date picker sends). Anything else imposes no bound.
pub fn parse_filter_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Does `trace` pass `filter`?
///
/// Checks run in a fixed order: fiber id, start date, end date, then search.
/// A non-empty `search` decides the result on its own once the earlier
/// checks have passed; it is not combined with anything after it.
pub fn matches(trace: &Trace, filter: &Filter) -> bool {
    if !filter.fiber_id.is_empty() && !trace.fiber_id.contains(&filter.fiber_id) {
        return false;
    }

    if let Some(start) = parse_filter_date(&filter.start_date) {
        if trace.timestamp < start {
            return false;
        }
    }

    if let Some(end) = parse_filter_date(&filter.end_date) {
        if trace.timestamp > end {
            return false;
        }
    }

    if !filter.search.is_empty() {
        let needle = filter.search.to_lowercase();
        return trace.file_name.to_lowercase().contains(&needle)
            || trace.fiber_id.to_lowercase().contains(&needle);
    }

    true
}
