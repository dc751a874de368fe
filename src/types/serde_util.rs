// src/types/serde_util.rs

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Accepts RFC 3339 and the offset-less ISO form the backend emits for
/// naive datetimes (treated as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

pub mod lenient_time {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

/// `null` and a missing field both become an empty list.
pub fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_naive_and_offset_forms() {
        let naive = parse_timestamp("2024-05-01T10:20:30.123456").unwrap();
        assert_eq!(naive.hour(), 10);

        let plain = parse_timestamp("2024-05-01T10:20:30").unwrap();
        assert_eq!(plain.minute(), 20);

        let offset = parse_timestamp("2024-05-01T10:20:30+02:00").unwrap();
        assert_eq!(offset.hour(), 8);
        assert_eq!(offset.day(), 1);

        assert!(parse_timestamp("yesterday").is_none());
    }
}
