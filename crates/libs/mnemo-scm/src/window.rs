//! Fetch-window selection for incremental sync.
//!
//! First sync reaches back `time_window_days`; incremental syncs start at
//! `cursor.ts - overlap_seconds` so late-arriving events at or before the
//! watermark are caught, and extend at most `forward_window_seconds`,
//! capped at `now`.

use chrono::{DateTime, Duration, Utc};
use mnemo_core::model::cursor::Cursor;
use mnemo_core::time::{parse_z, to_z};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: String,
    pub until: String,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowParams {
    pub overlap_seconds: i64,
    pub time_window_days: i64,
    pub forward_window_seconds: i64,
}

/// Compute the `[since, until]` window for one run.
pub fn compute_window(
    cursor: Option<&Cursor>,
    params: &WindowParams,
    now: DateTime<Utc>,
) -> FetchWindow {
    let cursor_ts = cursor
        .and_then(|c| c.last_commit_ts.as_deref())
        .and_then(parse_z);

    match cursor_ts {
        None => {
            let since = now - Duration::days(params.time_window_days);
            let until = (since + Duration::seconds(params.forward_window_seconds)).min(now);
            FetchWindow {
                since: to_z(since),
                until: to_z(until),
            }
        }
        Some(ts) => {
            let since = ts - Duration::seconds(params.overlap_seconds);
            let until = (since + Duration::seconds(params.forward_window_seconds)).min(now);
            FetchWindow {
                since: to_z(since),
                until: to_z(until),
            }
        }
    }
}

/// Sortable `(ts, sha)` event key; lexicographic on both parts, which is
/// chronological for `Z`-normalized timestamps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub ts: String,
    pub sha: String,
}

impl EventKey {
    pub fn new(ts: impl Into<String>, sha: impl Into<String>) -> Self {
        EventKey {
            ts: ts.into(),
            sha: sha.into(),
        }
    }
}

/// Drop events at or below the cursor watermark (I3 filter).
pub fn filter_past_watermark<T>(
    events: Vec<T>,
    cursor: Option<&Cursor>,
    key_of: impl Fn(&T) -> EventKey,
) -> Vec<T> {
    let Some(cursor) = cursor else {
        return events;
    };
    let (ts, sha) = cursor.git_key();
    if ts.is_empty() {
        return events;
    }
    let watermark = EventKey::new(ts, sha);
    events
        .into_iter()
        .filter(|e| key_of(e) > watermark)
        .collect()
}

/// Sort ascending by `(ts, sha)`; stable tie-break on sha lets a repeated
/// same-second commit stream process in one deterministic order.
pub fn sort_ascending<T>(events: &mut [T], key_of: impl Fn(&T) -> EventKey) {
    events.sort_by(|a, b| key_of(a).cmp(&key_of(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor_at(ts: &str, sha: &str) -> Cursor {
        Cursor {
            repo_id: 1,
            job_type: "gitlab_commits".to_string(),
            last_rev: None,
            last_commit_sha: Some(sha.to_string()),
            last_commit_ts: Some(ts.to_string()),
            last_sync_at: None,
            last_sync_count: 0,
        }
    }

    fn now() -> DateTime<Utc> {
        parse_z("2024-06-01T12:00:00Z").expect("fixed now")
    }

    #[test]
    fn first_sync_reaches_back_time_window_days() {
        let params = WindowParams {
            overlap_seconds: 120,
            time_window_days: 30,
            forward_window_seconds: 86_400,
        };
        let w = compute_window(None, &params, now());
        assert_eq!(w.since, "2024-05-02T12:00:00Z");
        // since + 1 day, still before now
        assert_eq!(w.until, "2024-05-03T12:00:00Z");
    }

    #[test]
    fn incremental_overlaps_behind_cursor() {
        let params = WindowParams {
            overlap_seconds: 120,
            time_window_days: 30,
            forward_window_seconds: 86_400,
        };
        let cursor = cursor_at("2024-06-01T10:00:00Z", "abc");
        let w = compute_window(Some(&cursor), &params, now());
        assert_eq!(w.since, "2024-06-01T09:58:00Z");
        // forward window would overshoot now; capped.
        assert_eq!(w.until, "2024-06-01T12:00:00Z");
    }

    #[test]
    fn forward_window_caps_until() {
        let params = WindowParams {
            overlap_seconds: 0,
            time_window_days: 30,
            forward_window_seconds: 3_600,
        };
        let cursor = cursor_at("2024-06-01T00:00:00Z", "abc");
        let w = compute_window(Some(&cursor), &params, now());
        assert_eq!(w.since, "2024-06-01T00:00:00Z");
        assert_eq!(w.until, "2024-06-01T01:00:00Z");
    }

    #[test]
    fn watermark_filter_drops_at_or_below() {
        let cursor = cursor_at("2024-06-01T10:00:00Z", "bbbb");
        let events = vec![
            ("2024-06-01T09:00:00Z", "zzzz"), // before ts
            ("2024-06-01T10:00:00Z", "aaaa"), // same ts, lower sha
            ("2024-06-01T10:00:00Z", "bbbb"), // exactly the watermark
            ("2024-06-01T10:00:00Z", "cccc"), // same ts, higher sha: kept
            ("2024-06-01T11:00:00Z", "0000"), // later ts: kept
        ];
        let kept = filter_past_watermark(events, Some(&cursor), |(ts, sha)| {
            EventKey::new(*ts, *sha)
        });
        assert_eq!(
            kept,
            vec![
                ("2024-06-01T10:00:00Z", "cccc"),
                ("2024-06-01T11:00:00Z", "0000"),
            ]
        );
    }

    #[test]
    fn no_cursor_keeps_everything() {
        let events = vec![("2024-01-01T00:00:00Z", "a")];
        let kept =
            filter_past_watermark(events.clone(), None, |(ts, sha)| EventKey::new(*ts, *sha));
        assert_eq!(kept, events);
    }

    #[test]
    fn sort_is_stable_on_same_second() {
        let mut events = vec![
            ("2024-06-01T10:00:00Z", "cccc"),
            ("2024-06-01T10:00:00Z", "aaaa"),
            ("2024-06-01T09:00:00Z", "zzzz"),
        ];
        sort_ascending(&mut events, |(ts, sha)| EventKey::new(*ts, *sha));
        assert_eq!(
            events,
            vec![
                ("2024-06-01T09:00:00Z", "zzzz"),
                ("2024-06-01T10:00:00Z", "aaaa"),
                ("2024-06-01T10:00:00Z", "cccc"),
            ]
        );
    }
}
