// Conversions between the absolute virtual clock and the scrubber's minute offset

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

use crate::errors::ReplayError;

/// Upper bound of the scrubber range, in minutes from the session start.
pub const SCRUBBER_MAX_MINUTES: u32 = 120;

const MINUTE_MS: i64 = 60_000;

/// Number of whole minutes between `session_start` and `timestamp`, rounded toward negative
/// infinity so that times before the start map to negative offsets.
pub fn offset_minutes(session_start: DateTime<Utc>, timestamp: DateTime<Utc>) -> i64 {
    (timestamp - session_start)
        .num_milliseconds()
        .div_euclid(MINUTE_MS)
}

/// Absolute time at `offset` whole minutes after `session_start`. Lossy inverse of
/// [`offset_minutes`]: anything below minute granularity is dropped.
pub fn time_at_offset(session_start: DateTime<Utc>, offset: i64) -> DateTime<Utc> {
    session_start + TimeDelta::milliseconds(offset * MINUTE_MS)
}

/// Parse a backend timestamp into an unambiguous UTC instant.
///
/// The backend emits both RFC 3339 strings and bare local-looking datetimes such as
/// `2024-03-02T15:03:40.123`; the latter are UTC without the `Z` suffix. A surrounding pair of
/// JSON quotes is tolerated so raw response bodies can be passed straight in.
pub fn parse_utc_timestamp(value: &str) -> Result<DateTime<Utc>, ReplayError> {
    let trimmed = value.trim().trim_matches('"');
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ReplayError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Serde adapter accepting either a timestamp string or epoch milliseconds.
pub(crate) fn deserialize_utc_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
        RawTimestamp::Text(text) => {
            parse_utc_timestamp(&text).map_err(|e| serde::de::Error::custom(e.to_string()))
        }
    }
}
