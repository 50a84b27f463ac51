//! Staleness classes for cached briefing fields.
//!
//! Whether a field needs regeneration is a pure function of
//! `(now, class, last_updated)`, never a raw timestamp comparison at call
//! sites: that is how off-by-one-day bugs across time zones creep in.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rule determining how long a cached field remains valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StalenessClass {
    /// Never cached; every read regenerates (rapidly changing conditions).
    AlwaysRefresh,
    /// Refresh once the cached value is older than `max_age`, regardless of
    /// calendar boundaries.
    ShortLived { max_age: Duration },
    /// Refresh on a local calendar-day boundary. The offset is a fixed
    /// number of minutes east of UTC (west is negative).
    Daily { utc_offset_minutes: i32 },
}

impl StalenessClass {
    /// A short-lived class with the given maximum age.
    pub fn short_lived(max_age: Duration) -> Self {
        Self::ShortLived { max_age }
    }

    /// A daily class for a zone the given number of minutes east of UTC.
    pub fn daily(utc_offset_minutes: i32) -> Self {
        Self::Daily { utc_offset_minutes }
    }

    /// Whether a value last updated at `last_updated` needs regeneration.
    pub fn is_stale(&self, now: Timestamp, last_updated: Timestamp) -> bool {
        match self {
            StalenessClass::AlwaysRefresh => true,
            StalenessClass::ShortLived { max_age } => {
                let age = (now - last_updated).to_std().unwrap_or(Duration::ZERO);
                age > *max_age
            }
            StalenessClass::Daily { utc_offset_minutes } => {
                local_date(now, *utc_offset_minutes) != local_date(last_updated, *utc_offset_minutes)
            }
        }
    }
}

/// Calendar date of `ts` in a zone `offset_minutes` east of UTC.
fn local_date(ts: Timestamp, offset_minutes: i32) -> chrono::NaiveDate {
    (ts + chrono::Duration::minutes(offset_minutes as i64)).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_always_refresh_is_always_stale() {
        let now = Utc::now();
        assert!(StalenessClass::AlwaysRefresh.is_stale(now, now));
    }

    #[test]
    fn test_short_lived_within_age_is_fresh() {
        let class = StalenessClass::short_lived(Duration::from_secs(6 * 3600));
        let now = at(2025, 1, 7, 12, 0);

        assert!(!class.is_stale(now, at(2025, 1, 7, 8, 0)));
        assert!(class.is_stale(now, at(2025, 1, 7, 5, 0)));
    }

    #[test]
    fn test_short_lived_future_timestamp_is_fresh() {
        // Clock skew: a value stamped slightly ahead of now is not stale.
        let class = StalenessClass::short_lived(Duration::from_secs(60));
        let now = at(2025, 1, 7, 12, 0);
        assert!(!class.is_stale(now, at(2025, 1, 7, 12, 1)));
    }

    #[test]
    fn test_daily_same_utc_day() {
        let class = StalenessClass::daily(0);
        assert!(!class.is_stale(at(2025, 1, 7, 23, 0), at(2025, 1, 7, 1, 0)));
        assert!(class.is_stale(at(2025, 1, 8, 0, 10), at(2025, 1, 7, 23, 50)));
    }

    #[test]
    fn test_daily_west_of_utc_crosses_later() {
        // Central Standard Time, UTC-6: 04:00 UTC on Jan 8 is still
        // 22:00 on Jan 7 locally, so a value from Jan 7 afternoon is fresh.
        let class = StalenessClass::daily(-360);
        assert!(!class.is_stale(at(2025, 1, 8, 4, 0), at(2025, 1, 7, 20, 0)));
        // 06:00 UTC is local midnight; by 07:00 UTC the local day flipped.
        assert!(class.is_stale(at(2025, 1, 8, 7, 0), at(2025, 1, 7, 20, 0)));
    }

    #[test]
    fn test_daily_east_of_utc_crosses_earlier() {
        // UTC+9: the local day flips at 15:00 UTC.
        let class = StalenessClass::daily(540);
        assert!(!class.is_stale(at(2025, 1, 7, 14, 0), at(2025, 1, 7, 10, 0)));
        assert!(class.is_stale(at(2025, 1, 7, 16, 0), at(2025, 1, 7, 10, 0)));
    }

    #[test]
    fn test_daily_is_pure() {
        let class = StalenessClass::daily(-360);
        let now = at(2025, 1, 8, 4, 0);
        let updated = at(2025, 1, 7, 20, 0);
        assert_eq!(class.is_stale(now, updated), class.is_stale(now, updated));
    }
}
