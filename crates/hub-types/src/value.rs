//! Latest-value tuples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The latest known value of one affordance of one digital twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffordanceValue {
    pub value: Value,
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "senderID")]
    pub sender_id: String,
}

impl AffordanceValue {
    pub fn new(value: Value, timestamp: DateTime<Utc>, sender_id: impl Into<String>) -> Self {
        Self {
            value,
            timestamp,
            sender_id: sender_id.into(),
        }
    }

    /// Whether `incoming` may replace this value.
    ///
    /// Timestamps are monotone per tuple: an older update is dropped and an
    /// equal one wins as the last writer.
    pub fn is_superseded_by(&self, incoming: &DateTime<Utc>) -> bool {
        *incoming >= self.timestamp
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    value: Value,
    #[serde(default, with = "crate::timestamp::option")]
    timestamp: Option<DateTime<Utc>>,
}

/// A value posted by an agent for an event or property.
///
/// Agents either post the bare value, which is stamped on arrival, or an
/// envelope object with exactly the keys `value` and optionally `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentValue {
    pub value: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

impl AgentValue {
    pub fn from_body(body: Value) -> Self {
        let is_envelope = body
            .as_object()
            .map(|o| o.contains_key("value") && o.keys().all(|k| k == "value" || k == "timestamp"))
            .unwrap_or(false);
        if is_envelope {
            if let Ok(env) = serde_json::from_value::<Envelope>(body.clone()) {
                return Self {
                    value: env.value,
                    timestamp: env.timestamp,
                };
            }
        }
        Self {
            value: body,
            timestamp: None,
        }
    }

    /// The agent timestamp, or `now` when the agent sent none.
    pub fn timestamp_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp.unwrap_or(now)
    }
}
