//! Push messages and wire frames.
//!
//! [`PushMessage`] is the protocol-neutral unit queued on a push channel. The
//! SSE writer renders it as `event:`/`id:`/`data:` lines; the WebSocket writer
//! renders it as a [`WsMessage`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Hub operations, used for routing decisions and request logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadProperty,
    ReadAllProperties,
    WriteProperty,
    ReadEvent,
    ReadAllEvents,
    QueryAction,
    QueryAllActions,
    InvokeAction,
    ReadThing,
    ReadAllThings,
    Subscribe,
    Unsubscribe,
    Observe,
    Unobserve,
    PublishEvent,
    UpdateProperty,
    UpdateThing,
    RemoveThing,
    UpdateActionStatus,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadProperty => "readProperty",
            Self::ReadAllProperties => "readAllProperties",
            Self::WriteProperty => "writeProperty",
            Self::ReadEvent => "readEvent",
            Self::ReadAllEvents => "readAllEvents",
            Self::QueryAction => "queryAction",
            Self::QueryAllActions => "queryAllActions",
            Self::InvokeAction => "invokeAction",
            Self::ReadThing => "readThing",
            Self::ReadAllThings => "readAllThings",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Observe => "observe",
            Self::Unobserve => "unobserve",
            Self::PublishEvent => "publishEvent",
            Self::UpdateProperty => "updateProperty",
            Self::UpdateThing => "updateThing",
            Self::RemoveThing => "removeThing",
            Self::UpdateActionStatus => "updateActionStatus",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a push message; the SSE `event:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PushKind {
    Ping,
    /// Event notification to a subscriber.
    Event,
    /// Property change notification to an observer.
    Property,
    /// Action request forwarded to an agent.
    InvokeAction,
    /// Property write request forwarded to an agent.
    WriteProperty,
    /// Action progress for a consumer.
    ActionStatus,
}

impl PushKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Event => "event",
            Self::Property => "property",
            Self::InvokeAction => "invokeAction",
            Self::WriteProperty => "writeProperty",
            Self::ActionStatus => "actionStatus",
        }
    }
}

impl fmt::Display for PushKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-to-client message queued on a push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub kind: PushKind,
    pub thing_id: String,
    pub name: String,
    pub sender_id: String,
    pub request_id: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl PushMessage {
    pub fn new(
        kind: PushKind,
        thing_id: impl Into<String>,
        name: impl Into<String>,
        sender_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            thing_id: thing_id.into(),
            name: name.into(),
            sender_id: sender_id.into(),
            request_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn ping() -> Self {
        Self::new(PushKind::Ping, "", "", "", Value::Null)
    }

    /// Structured SSE id: `{dThingID}/{name}/{senderID}/{requestID}`.
    ///
    /// The request id segment is empty for notifications.
    pub fn sse_id(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.thing_id,
            self.name,
            self.sender_id,
            self.request_id.as_deref().unwrap_or_default()
        )
    }
}

/// WebSocket `messageType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WsMessageType {
    Event,
    Property,
    Action,
    ActionStatus,
    Subscribe,
    Unsubscribe,
    Observe,
    Unobserve,
    Ping,
}

/// WebSocket frame, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage {
    #[serde(default)]
    pub thing_id: String,
    pub message_type: WsMessageType,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "requestID", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "senderID", default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_state: Option<crate::ProgressState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, with = "crate::timestamp::option", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WsMessage {
    pub fn new(message_type: WsMessageType, thing_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            thing_id: thing_id.into(),
            message_type,
            name: name.into(),
            request_id: None,
            sender_id: None,
            data: None,
            input: None,
            output: None,
            progress_state: None,
            error: None,
            timestamp: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sse_id_for_notification() {
        let msg = PushMessage::new(PushKind::Event, "T1", "temperature", "A", json!(21.5));
        assert_eq!(msg.sse_id(), "T1/temperature/A/");
    }

    #[test]
    fn test_sse_id_for_request() {
        let msg = PushMessage::new(PushKind::InvokeAction, "T1", "toggle", "C", json!(true))
            .with_request_id("r1");
        assert_eq!(msg.sse_id(), "T1/toggle/C/r1");
    }

    #[test]
    fn test_push_kind_wire_names() {
        assert_eq!(serde_json::to_value(PushKind::InvokeAction).unwrap(), "invokeAction");
        assert_eq!(PushKind::ActionStatus.to_string(), "actionStatus");
    }

    #[test]
    fn test_ws_inbound_frame() {
        let msg: WsMessage = serde_json::from_value(json!({
            "thingId": "T1",
            "messageType": "subscribe",
            "name": "+"
        }))
        .unwrap();
        assert_eq!(msg.message_type, WsMessageType::Subscribe);
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_ws_action_status_frame() {
        let msg: WsMessage = serde_json::from_value(json!({
            "messageType": "actionStatus",
            "requestID": "r1",
            "progressState": "completed",
            "output": "on",
            "timestamp": 10
        }))
        .unwrap();
        assert_eq!(msg.progress_state, Some(crate::ProgressState::Completed));
        assert_eq!(msg.output, Some(json!("on")));
        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(out["timestamp"], "1970-01-01T00:00:00.010Z");
        assert!(out.get("data").is_none());
    }
}
