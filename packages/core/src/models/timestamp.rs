//! Audit timestamp handling
//!
//! Audit timestamps double as the optimistic-concurrency witness, so every
//! timestamp that reaches a store is truncated to microseconds and rendered
//! in one fixed RFC 3339 shape (`2025-01-01T09:30:00.000000Z`). Two witnesses
//! compare equal exactly when their stored strings are equal, and the
//! strings sort in time order.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Current UTC time truncated to microsecond precision
pub fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}

/// Drop sub-microsecond precision
pub fn truncate(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// Render a timestamp in the canonical stored form
pub fn format(ts: &DateTime<Utc>) -> String {
    truncate(*ts).to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp; any RFC 3339 form is accepted
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| truncate(dt.with_timezone(&Utc)))
}

/// Next modification stamp after `previous`
///
/// Wall clocks can stall or step backwards; the returned value is always at
/// least one microsecond after `previous` so the witness strictly increases.
pub fn next_after(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let current = now();
    match previous {
        Some(prev) if current <= prev => truncate(prev) + Duration::microseconds(1),
        _ => current,
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` audit fields
pub mod micros {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => super::parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_is_fixed_width_micros() {
        let ts = parse("2025-03-01T10:00:00Z").unwrap();
        assert_eq!(format(&ts), "2025-03-01T10:00:00.000000Z");
    }

    #[test]
    fn test_next_after_strictly_increases() {
        let future = now() + Duration::seconds(30);
        let next = next_after(Some(future));
        assert!(next > future);
        assert_eq!(next - future, Duration::microseconds(1));

        let past = now() - Duration::seconds(30);
        assert!(next_after(Some(past)) > past);
        assert!(next_after(None) <= now());
    }

    #[test]
    fn test_parse_truncates_nanoseconds() {
        let ts = parse("2025-03-01T10:00:00.123456789Z").unwrap();
        assert_eq!(format(&ts), "2025-03-01T10:00:00.123456Z");
    }
}
