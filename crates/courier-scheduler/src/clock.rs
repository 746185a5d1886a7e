//! Wall-clock arithmetic across IANA timezones.
//!
//! Everything here fails soft: an unrecognized zone identifier degrades to a
//! logged fallback (sentinel hour, UTC rendering) and never becomes an error.
//! Window math is hour-granular — "next window open" instants are minute- and
//! second-zeroed, matching the delivery-window granularity used throughout.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// The same instant rendered in two parties' local timezones.
#[derive(Debug, Clone, Serialize)]
pub struct DualTime {
    pub utc: String,
    pub sender_local: String,
    pub receiver_local: String,
}

/// Resolve the wall-clock hour (0-23) of `instant` in `timezone`.
///
/// Returns `None` for an unrecognized zone — the sentinel downstream policy
/// interprets as "always within active hours" (fail open).
pub fn local_hour(instant: DateTime<Utc>, timezone: &str) -> Option<u32> {
    match timezone.parse::<Tz>() {
        Ok(tz) => Some(instant.with_timezone(&tz).hour()),
        Err(_) => {
            tracing::warn!(
                "⚠️ Unrecognized timezone '{timezone}' — treating user as always deliverable"
            );
            None
        }
    }
}

/// Render `instant` in `timezone`, falling back to the UTC rendering when the
/// zone fails to parse.
pub fn local_string(instant: DateTime<Utc>, timezone: &str) -> String {
    match timezone.parse::<Tz>() {
        Ok(tz) => instant
            .with_timezone(&tz)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string(),
        Err(_) => {
            tracing::warn!("⚠️ Unrecognized timezone '{timezone}' — rendering as UTC");
            utc_string(instant)
        }
    }
}

/// RFC 3339-style UTC rendering used at every boundary.
pub fn utc_string(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Render one instant in both parties' zones. Never fails: whichever side has
/// a malformed zone comes back as the UTC string instead.
pub fn dual_time(sender_tz: &str, receiver_tz: &str, instant: DateTime<Utc>) -> DualTime {
    DualTime {
        utc: utc_string(instant),
        sender_local: local_string(instant, sender_tz),
        receiver_local: local_string(instant, receiver_tz),
    }
}

/// Next UTC instant at or after `hint` whose local rendering in `timezone`
/// has hour `target_hour` and minute/second zero. If the hint's local hour
/// already equals or exceeds `target_hour`, rolls to the next calendar day in
/// that zone. `None` only when the zone itself is unrecognized.
pub fn next_local_instant(
    hint: DateTime<Utc>,
    timezone: &str,
    target_hour: u32,
) -> Option<DateTime<Utc>> {
    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!("⚠️ Unrecognized timezone '{timezone}' — no next-instant computed");
            return None;
        }
    };

    let local = hint.with_timezone(&tz);
    let mut date = local.date_naive();
    if local.hour() >= target_hour {
        date = date.succ_opt()?;
    }
    let naive = date.and_hms_opt(target_hour, 0, 0)?;
    Some(resolve_local(&tz, naive))
}

/// Parse a wall-clock timestamp with no zone attached ("2026-03-01T15:00:00",
/// seconds optional, `T` or space separator).
pub fn parse_local_timestamp(input: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(input.trim(), f).ok())
}

/// Interpret a naive wall-clock time as local time in `timezone` and return
/// the UTC instant. An unrecognized zone falls back to interpreting the input
/// as UTC (fail open).
pub fn local_to_utc(naive: NaiveDateTime, timezone: &str) -> DateTime<Utc> {
    match timezone.parse::<Tz>() {
        Ok(tz) => resolve_local(&tz, naive),
        Err(_) => {
            tracing::warn!("⚠️ Unrecognized timezone '{timezone}' — interpreting input as UTC");
            Utc.from_utc_datetime(&naive)
        }
    }
}

/// Map a local wall-clock time onto the UTC timeline. DST transitions: an
/// ambiguous local time resolves to the earlier instant, a nonexistent one is
/// pushed forward past the gap.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    dt.with_timezone(&Utc)
                }
                LocalResult::None => Utc.from_utc_datetime(&naive),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_local_hour_known_zones() {
        // 12:00 UTC in mid-January: New York is EST (UTC-5), Lagos is UTC+1
        let instant = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(local_hour(instant, "America/New_York"), Some(7));
        assert_eq!(local_hour(instant, "Africa/Lagos"), Some(13));
        assert_eq!(local_hour(instant, "UTC"), Some(12));
    }

    #[test]
    fn test_local_hour_bad_zone_is_sentinel() {
        let instant = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(local_hour(instant, "Mars/Olympus_Mons"), None);
        assert_eq!(local_hour(instant, ""), None);
    }

    #[test]
    fn test_next_local_instant_same_day() {
        // 06:00 UTC = 07:00 Lagos; target 9 → today 09:00 Lagos = 08:00 UTC
        let hint = Utc.with_ymd_and_hms(2026, 1, 15, 6, 0, 0).unwrap();
        let next = next_local_instant(hint, "Africa/Lagos", 9).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_next_local_instant_rolls_to_next_day() {
        // 22:00 UTC = 23:00 Lagos; target 9 → tomorrow 09:00 Lagos = 08:00 UTC
        let hint = Utc.with_ymd_and_hms(2026, 1, 15, 22, 0, 0).unwrap();
        let next = next_local_instant(hint, "Africa/Lagos", 9).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 16, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_next_local_instant_equal_hour_rolls() {
        // 08:00 UTC = 09:00 Lagos exactly; equal hour rolls to tomorrow
        let hint = Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap();
        let next = next_local_instant(hint, "Africa/Lagos", 9).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 16, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_next_local_instant_minute_zeroed() {
        let hint = Utc.with_ymd_and_hms(2026, 1, 15, 6, 42, 17).unwrap();
        let next = next_local_instant(hint, "America/New_York", 9).unwrap();
        let local = next.with_timezone(&"America/New_York".parse::<Tz>().unwrap());
        assert_eq!(local.hour(), 9);
        assert_eq!(local.minute(), 0);
        assert_eq!(local.second(), 0);
    }

    #[test]
    fn test_next_local_instant_dst_gap() {
        // US spring-forward 2026-03-08: 02:00 EST does not exist.
        // Hint 05:00 UTC = 00:00 EST; target 2 lands in the gap and is pushed
        // to 03:00 EDT = 07:00 UTC.
        let hint = Utc.with_ymd_and_hms(2026, 3, 8, 5, 0, 0).unwrap();
        let next = next_local_instant(hint, "America/New_York", 2).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 8, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_next_local_instant_bad_zone() {
        let hint = Utc.with_ymd_and_hms(2026, 1, 15, 6, 0, 0).unwrap();
        assert!(next_local_instant(hint, "Not/A_Zone", 9).is_none());
    }

    #[test]
    fn test_dual_time_both_zones() {
        let instant = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let dt = dual_time("America/New_York", "Europe/London", instant);
        assert_eq!(dt.utc, "2026-01-15T12:00:00Z");
        assert!(dt.sender_local.starts_with("2026-01-15 07:00:00"));
        assert!(dt.receiver_local.starts_with("2026-01-15 12:00:00"));
    }

    #[test]
    fn test_dual_time_bad_zone_falls_back_to_utc() {
        let instant = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let dt = dual_time("Bad/Zone", "Europe/London", instant);
        assert_eq!(dt.sender_local, "2026-01-15T12:00:00Z");
        assert!(dt.receiver_local.starts_with("2026-01-15 12:00:00"));
    }

    #[test]
    fn test_parse_local_timestamp_formats() {
        assert!(parse_local_timestamp("2026-03-01T15:00:00").is_some());
        assert!(parse_local_timestamp("2026-03-01 15:00").is_some());
        assert!(parse_local_timestamp("not-a-time").is_none());
        assert!(parse_local_timestamp("").is_none());
    }

    #[test]
    fn test_local_to_utc() {
        // 12:00 Lagos (UTC+1) = 11:00 UTC
        let naive = parse_local_timestamp("2026-01-15T12:00:00").unwrap();
        let utc = local_to_utc(naive, "Africa/Lagos");
        assert_eq!(utc, Utc.with_ymd_and_hms(2026, 1, 15, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_local_to_utc_bad_zone_reads_as_utc() {
        let naive = parse_local_timestamp("2026-01-15T12:00:00").unwrap();
        let utc = local_to_utc(naive, "Nowhere/Null");
        assert_eq!(utc, Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap());
    }
}
