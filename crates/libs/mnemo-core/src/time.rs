//! UTC timestamp helpers.
//!
//! Every timestamp stored in the database uses ISO-8601 with a trailing
//! `Z`. Comparisons on those strings are then lexicographic, which the
//! cursor monotonicity check relies on.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_z() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render a datetime as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn to_z(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Normalize an ISO-8601 timestamp to UTC with a `Z` suffix.
///
/// Accepts offsets (`+08:00`), a space separator, and fractional seconds;
/// fractions are dropped. Returns `None` when the input does not parse.
pub fn normalize_iso_ts_z(raw: &str) -> Option<String> {
    let candidate = raw.trim().replace(' ', "T");
    let parsed = DateTime::parse_from_rfc3339(&candidate)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(&format!("{candidate}Z")).ok())?;
    Some(to_z(parsed.with_timezone(&Utc)))
}

/// Parse a `Z`-suffixed timestamp back into a `DateTime<Utc>`.
pub fn parse_z(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_offsets_to_utc() {
        assert_eq!(
            normalize_iso_ts_z("2024-05-01T10:00:00+08:00").as_deref(),
            Some("2024-05-01T02:00:00Z")
        );
        assert_eq!(
            normalize_iso_ts_z("2024-05-01 10:00:00+00:00").as_deref(),
            Some("2024-05-01T10:00:00Z")
        );
        assert_eq!(
            normalize_iso_ts_z("2024-05-01T10:00:00.123Z").as_deref(),
            Some("2024-05-01T10:00:00Z")
        );
    }

    #[test]
    fn naive_input_is_treated_as_utc() {
        assert_eq!(
            normalize_iso_ts_z("2024-05-01T10:00:00").as_deref(),
            Some("2024-05-01T10:00:00Z")
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(normalize_iso_ts_z("yesterday").is_none());
        assert!(normalize_iso_ts_z("").is_none());
    }
}
