//! Timestamp helpers. All stored timestamps use one fixed-width RFC 3339
//! format so that string order equals time order.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cuid2::CuidConstructor;
use once_cell::sync::Lazy;

static CUID: Lazy<CuidConstructor> = Lazy::new(CuidConstructor::new);

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// Returns `now`, or one microsecond past `last` when the clock has not moved
/// beyond the previous message (same tick or a backwards step).
pub fn next_timestamp(now: DateTime<Utc>, last: Option<&str>) -> DateTime<Utc> {
    let Some(last) = last.and_then(|value| DateTime::parse_from_rfc3339(value).ok()) else {
        return now;
    };
    let last = last.with_timezone(&Utc);

    if now > last {
        now
    } else {
        last + Duration::microseconds(1)
    }
}

pub fn new_public_id() -> String {
    CUID.create_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_timestamp_keeps_clock_when_ahead() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = last + Duration::seconds(1);
        assert_eq!(next_timestamp(now, Some(&format_timestamp(last))), now);
    }

    #[test]
    fn next_timestamp_bumps_on_collision_and_skew() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let last_str = format_timestamp(last);

        let same = next_timestamp(last, Some(&last_str));
        assert_eq!(same, last + Duration::microseconds(1));

        let behind = next_timestamp(last - Duration::seconds(3), Some(&last_str));
        assert_eq!(behind, last + Duration::microseconds(1));
    }

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 59, 59).unwrap();
        let late = early + Duration::microseconds(1_500_000);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert!(format_timestamp(early).ends_with('Z'));
    }

    #[test]
    fn public_ids_are_unique() {
        assert_ne!(new_public_id(), new_public_id());
    }
}
