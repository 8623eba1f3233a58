//! Read-side helpers over a loaded room. All linear scans.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::model::{LogEntry, RoomLog};

/// Selection for [`filter_entries`]. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    /// Keep at most this many of the newest matches
    pub count: Option<usize>,
    /// Keep entries strictly after this instant
    pub since: Option<DateTime<Utc>>,
    /// Keep entries no older than this many seconds
    pub last_seconds: Option<u64>,
}

/// Room summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStats {
    pub created_at: DateTime<Utc>,
    pub total_entries: usize,
    pub distinct_senders: usize,
}

impl RoomStats {
    pub fn of(log: &RoomLog) -> Self {
        Self {
            created_at: log.created_at,
            total_entries: log.entries.len(),
            distinct_senders: log.distinct_senders().len(),
        }
    }
}

/// `now - window`, or `None` when the window reaches past representable time.
fn cutoff(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
}

fn tail(entries: &[LogEntry], count: usize) -> &[LogEntry] {
    &entries[entries.len().saturating_sub(count)..]
}

/// The newest `count` entries, oldest first.
pub fn recent_entries(log: &RoomLog, count: usize) -> Vec<LogEntry> {
    tail(&log.entries, count).to_vec()
}

pub fn filter_entries(log: &RoomLog, filter: &EntryFilter, now: DateTime<Utc>) -> Vec<LogEntry> {
    let window_start = filter
        .last_seconds
        .and_then(|secs| cutoff(now, Duration::from_secs(secs)));

    let matched: Vec<LogEntry> = log
        .entries
        .iter()
        .filter(|e| filter.since.map_or(true, |since| e.timestamp > since))
        .filter(|e| window_start.map_or(true, |start| e.timestamp >= start))
        .cloned()
        .collect();

    match filter.count {
        Some(count) => tail(&matched, count).to_vec(),
        None => matched,
    }
}

/// Entries whose content contains `query`, ignoring case.
pub fn search_entries(log: &RoomLog, query: &str) -> Vec<LogEntry> {
    let needle = query.to_lowercase();
    log.entries
        .iter()
        .filter(|e| e.content.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Labels active within `window` of `now`, sorted and deduplicated.
pub fn active_labels(log: &RoomLog, window: Duration, now: DateTime<Utc>) -> Vec<String> {
    let start = cutoff(now, window);
    log.last_seen
        .iter()
        .filter(|(_, seen)| start.map_or(true, |start| **seen >= start))
        .map(|(label, _)| label.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn room() -> RoomLog {
        let mut log = RoomLog::new("/p");
        let rows = [
            ("Amber", "Test the build", 0),
            ("Birch", "deploy done", 10),
            ("Amber", "another TEST run", 20),
            ("Cedar", "lunch?", 30),
            ("Birch", "tests pass", 40),
        ];
        for (sender, content, offset) in rows {
            log.entries.push(
                LogEntry::new(sender, content, MessageKind::Text).with_timestamp(at(offset)),
            );
            log.touch(sender, at(offset));
        }
        log
    }

    fn contents(entries: &[LogEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.content.as_str()).collect()
    }

    #[test]
    fn test_recent_returns_newest_in_order() {
        let log = room();
        assert_eq!(
            contents(&recent_entries(&log, 2)),
            vec!["lunch?", "tests pass"]
        );
        assert_eq!(recent_entries(&log, 100).len(), 5);
        assert!(recent_entries(&log, 0).is_empty());
    }

    #[test]
    fn test_filter_since_is_exclusive() {
        let log = room();
        let filter = EntryFilter {
            since: Some(at(20)),
            ..Default::default()
        };
        assert_eq!(
            contents(&filter_entries(&log, &filter, at(100))),
            vec!["lunch?", "tests pass"]
        );
    }

    #[test]
    fn test_filter_last_seconds_is_inclusive() {
        let log = room();
        let filter = EntryFilter {
            last_seconds: Some(20),
            ..Default::default()
        };
        assert_eq!(
            contents(&filter_entries(&log, &filter, at(40))),
            vec!["another TEST run", "lunch?", "tests pass"]
        );
    }

    #[test]
    fn test_filter_combines_with_count() {
        let log = room();
        let filter = EntryFilter {
            count: Some(1),
            since: Some(at(0)),
            last_seconds: Some(35),
        };
        assert_eq!(
            contents(&filter_entries(&log, &filter, at(40))),
            vec!["tests pass"]
        );
    }

    #[test]
    fn test_empty_filter_returns_everything() {
        let log = room();
        assert_eq!(
            filter_entries(&log, &EntryFilter::default(), at(0)).len(),
            5
        );
    }

    #[test]
    fn test_search_ignores_case() {
        let log = room();
        let lower = search_entries(&log, "test");
        let upper = search_entries(&log, "TEST");
        assert_eq!(lower, upper);
        assert_eq!(
            contents(&lower),
            vec!["Test the build", "another TEST run", "tests pass"]
        );
        assert!(search_entries(&log, "nothing like this").is_empty());
    }

    #[test]
    fn test_active_labels_window() {
        let log = room();
        assert_eq!(
            active_labels(&log, Duration::from_secs(15), at(40)),
            vec!["Birch", "Cedar"]
        );
        assert_eq!(
            active_labels(&log, Duration::from_secs(3600), at(40)),
            vec!["Amber", "Birch", "Cedar"]
        );
        assert!(active_labels(&log, Duration::from_secs(5), at(1000)).is_empty());
    }

    #[test]
    fn test_active_labels_huge_window() {
        let log = room();
        assert_eq!(active_labels(&log, Duration::MAX, at(40)).len(), 3);
    }

    #[test]
    fn test_stats() {
        let log = room();
        let stats = RoomStats::of(&log);
        assert_eq!(stats.total_entries, 5);
        assert_eq!(stats.distinct_senders, 3);
        assert_eq!(stats.created_at, log.created_at);
    }
}
