//! Timestamp serde helpers.
//!
//! Timestamps are serialized as RFC 3339 strings with millisecond precision.
//! On input both RFC 3339 strings and integer epoch milliseconds are accepted,
//! since agents on constrained devices often only keep a millisecond counter.

use crate::errors::TypeError;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Either wire form of a timestamp.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

/// Format a timestamp the way the Hub emits it.
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert epoch milliseconds to a timestamp.
pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, TypeError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| TypeError::InvalidTimestamp(ms.to_string()))
}

/// Parse an RFC 3339 string.
pub fn parse(text: &str) -> Result<DateTime<Utc>, TypeError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TypeError::InvalidTimestamp(format!("{text}: {e}")))
}

fn from_raw(raw: RawTimestamp) -> Result<DateTime<Utc>, TypeError> {
    match raw {
        RawTimestamp::Millis(ms) => from_millis(ms),
        RawTimestamp::Text(text) => parse(&text),
    }
}

pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(ts))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = RawTimestamp::deserialize(deserializer)?;
    from_raw(raw).map_err(serde::de::Error::custom)
}

/// `Option<DateTime<Utc>>` variant for optional timestamp fields.
pub mod option {
    use super::*;

    pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => serializer.serialize_str(&super::format(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
        raw.map(from_raw)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
