//! Sync staleness: has the last reconciliation pull aged past the interval?

use std::time::Duration;

use chrono::{DateTime, Utc};

use spamsub_core::LastSyncMark;

/// Stale when no pull has ever completed, or the last one is strictly older
/// than `interval`.
pub fn is_stale(mark: Option<&LastSyncMark>, interval: Duration, now: DateTime<Utc>) -> bool {
    let Some(mark) = mark else {
        return true;
    };
    let age = mark.age(now).num_seconds().max(0) as u64;
    age > interval.as_secs()
}

/// Compact age of the last pull, e.g. `"3m ago"`; `"never"` without a mark.
pub fn format_age(mark: Option<&LastSyncMark>, now: DateTime<Utc>) -> String {
    match mark {
        Some(mark) => format!("{} ago", format_seconds(mark.age(now).num_seconds().max(0) as u64)),
        None => "never".to_string(),
    }
}

pub(crate) fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    const HOUR: Duration = Duration::from_secs(3_600);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap()
    }

    fn mark(age_secs: i64) -> LastSyncMark {
        LastSyncMark {
            synced_at: now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[test]
    fn never_synced_is_stale() {
        assert!(is_stale(None, HOUR, now()));
        assert_eq!(format_age(None, now()), "never");
    }

    #[test]
    fn boundary_is_strictly_greater() {
        assert!(!is_stale(Some(&mark(3_600)), HOUR, now()));
        assert!(is_stale(Some(&mark(3_601)), HOUR, now()));
        assert!(!is_stale(Some(&mark(10)), HOUR, now()));
    }

    #[test]
    fn ages_are_compact() {
        assert_eq!(format_age(Some(&mark(42)), now()), "42s ago");
        assert_eq!(format_age(Some(&mark(185)), now()), "3m ago");
        assert_eq!(format_age(Some(&mark(7_300)), now()), "2h ago");
        assert_eq!(format_age(Some(&mark(200_000)), now()), "2d ago");
    }
}
