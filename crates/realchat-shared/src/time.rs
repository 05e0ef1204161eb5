//! Timestamp parsing and human-readable relative times.
//!
//! [`relative_time`] produces the familiar "3 minutes ago" / "in 2 days"
//! phrasing. The thresholds are:
//!
//! | distance                    | text                     |
//! |-----------------------------|--------------------------|
//! | 0 - 29 s                    | less than a minute       |
//! | 30 s - 1 min 29 s           | 1 minute                 |
//! | 1 min 30 s - 44 min 29 s    | N minutes                |
//! | 44 min 30 s - 89 min 29 s   | about 1 hour             |
//! | 89 min 30 s - 23 h 59 min   | about N hours            |
//! | up to 41 h 59 min           | 1 day                    |
//! | up to 29 days               | N days                   |
//! | up to 59 days               | about N months           |
//! | up to 12 calendar months    | N months                 |
//! | beyond                      | about / over / almost N years |

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::SharedError;

const MINUTES_IN_DAY: i64 = 1_440;
const MINUTES_IN_ALMOST_TWO_DAYS: i64 = 2_520;
const MINUTES_IN_MONTH: i64 = 43_200;
const MINUTES_IN_TWO_MONTHS: i64 = 86_400;

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 (`2024-03-01T10:15:00.123+00:00`), the space-separated
/// form Postgres prints, and offset-less timestamps, which are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SharedError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let normalized = raw.replacen(' ', "T", 1);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Postgres abbreviates a zero offset to "+00".
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%#z") {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| SharedError::InvalidTimestamp(raw.to_string()))
}

/// Serde adapter for [`parse_timestamp`].
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Distance between `then` and `now` in words, with an "ago" / "in" suffix.
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let (earlier, later) = if then <= now { (then, now) } else { (now, then) };
    let distance = distance_in_words(earlier, later);

    if then > now {
        format!("in {distance}")
    } else {
        format!("{distance} ago")
    }
}

fn distance_in_words(earlier: DateTime<Utc>, later: DateTime<Utc>) -> String {
    let seconds = (later - earlier).num_seconds();
    let minutes = (seconds as f64 / 60.0).round() as i64;

    if minutes < 2 {
        return if minutes == 0 {
            "less than a minute".to_string()
        } else {
            "1 minute".to_string()
        };
    }
    if minutes < 45 {
        return format!("{minutes} minutes");
    }
    if minutes < 90 {
        return "about 1 hour".to_string();
    }
    if minutes < MINUTES_IN_DAY {
        let hours = (minutes as f64 / 60.0).round() as i64;
        return format!("about {hours} hours");
    }
    if minutes < MINUTES_IN_ALMOST_TWO_DAYS {
        return "1 day".to_string();
    }
    if minutes < MINUTES_IN_MONTH {
        let days = (minutes as f64 / MINUTES_IN_DAY as f64).round() as i64;
        return format!("{days} days");
    }
    if minutes < MINUTES_IN_TWO_MONTHS {
        let months = (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64;
        return plural(months, "about 1 month", "about {} months");
    }

    let months = calendar_months_between(earlier, later);
    if months < 12 {
        let nearest = (minutes as f64 / MINUTES_IN_MONTH as f64).round() as i64;
        return plural(nearest, "1 month", "{} months");
    }

    let years = months / 12;
    match months % 12 {
        0..=2 => plural(years, "about 1 year", "about {} years"),
        3..=8 => plural(years, "over 1 year", "over {} years"),
        _ => format!("almost {} years", years + 1),
    }
}

fn plural(n: i64, one: &str, many: &str) -> String {
    if n == 1 {
        one.to_string()
    } else {
        many.replace("{}", &n.to_string())
    }
}

/// Whole calendar months from `earlier` to `later`.
fn calendar_months_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    let mut months = i64::from(later.year() - earlier.year()) * 12
        + i64::from(later.month()) - i64::from(earlier.month());

    let later_key = (later.day(), later.num_seconds_from_midnight(), later.nanosecond());
    let earlier_key = (earlier.day(), earlier.num_seconds_from_midnight(), earlier.nanosecond());
    if months > 0 && later_key < earlier_key {
        months -= 1;
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn ago(d: Duration) -> String {
        relative_time(now() - d, now())
    }

    #[test]
    fn test_three_minutes_ago() {
        assert_eq!(ago(Duration::minutes(3)), "3 minutes ago");
    }

    #[test]
    fn test_under_a_minute() {
        assert_eq!(ago(Duration::seconds(0)), "less than a minute ago");
        assert_eq!(ago(Duration::seconds(29)), "less than a minute ago");
        assert_eq!(ago(Duration::seconds(30)), "1 minute ago");
        assert_eq!(ago(Duration::seconds(89)), "1 minute ago");
    }

    #[test]
    fn test_hours() {
        assert_eq!(ago(Duration::minutes(44)), "44 minutes ago");
        assert_eq!(ago(Duration::minutes(45)), "about 1 hour ago");
        assert_eq!(ago(Duration::minutes(90)), "about 2 hours ago");
        assert_eq!(ago(Duration::hours(23)), "about 23 hours ago");
    }

    #[test]
    fn test_days_and_months() {
        assert_eq!(ago(Duration::hours(30)), "1 day ago");
        assert_eq!(ago(Duration::days(5)), "5 days ago");
        assert_eq!(ago(Duration::days(35)), "about 1 month ago");
        assert_eq!(ago(Duration::days(50)), "about 2 months ago");
        assert_eq!(ago(Duration::days(120)), "4 months ago");
    }

    #[test]
    fn test_years() {
        assert_eq!(ago(Duration::days(370)), "about 1 year ago");
        assert_eq!(ago(Duration::days(550)), "over 1 year ago");
        assert_eq!(ago(Duration::days(700)), "almost 2 years ago");
    }

    #[test]
    fn test_future_timestamp() {
        let later = now() + Duration::minutes(5);
        assert_eq!(relative_time(later, now()), "in 5 minutes");
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T10:15:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T10:15:00+00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01 10:15:00+00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T10:15:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T12:15:00+02:00").unwrap(), expected);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
