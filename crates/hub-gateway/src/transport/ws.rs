//! WebSocket push channel.
//!
//! Carries the same push messages as SSE, framed as JSON [`WsMessage`]s, and
//! also accepts operations from the client on the same socket.

use super::sse::ChannelRelease;
use super::{require_agent, require_operator, AppState};
use crate::domain::{ApiError, ApiResult};
use crate::middleware::AuthContext;
use crate::router::{InvokeMode, Router};
use crate::sessions::{ChannelKind, PushChannel, Session};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use hub_types::{
    ActionStatus, AgentValue, Operation, ProgressState, PushKind, PushMessage, WsMessage,
    WsMessageType, WILDCARD,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// `GET /ws`
pub async fn connect(
    State(state): State<AppState>,
    auth: AuthContext,
    ws: WebSocketUpgrade,
) -> Response {
    let max_message = state.config.limits.max_request_size;
    ws.max_message_size(max_message)
        .on_upgrade(move |socket| run(state, auth.session, socket))
}

/// Render a push message as a WebSocket frame.
pub fn to_ws(msg: &PushMessage) -> WsMessage {
    let message_type = match msg.kind {
        PushKind::Ping => WsMessageType::Ping,
        PushKind::Event => WsMessageType::Event,
        PushKind::Property | PushKind::WriteProperty => WsMessageType::Property,
        PushKind::InvokeAction => WsMessageType::Action,
        PushKind::ActionStatus => WsMessageType::ActionStatus,
    };
    let mut frame = WsMessage::new(message_type, msg.thing_id.clone(), msg.name.clone());
    frame.request_id = msg.request_id.clone();
    frame.timestamp = Some(msg.timestamp);
    if !msg.sender_id.is_empty() {
        frame.sender_id = Some(msg.sender_id.clone());
    }
    match msg.kind {
        PushKind::Ping => {}
        PushKind::InvokeAction => frame.input = Some(msg.payload.clone()),
        PushKind::ActionStatus => {
            match serde_json::from_value::<ActionStatus>(msg.payload.clone()) {
                Ok(status) => {
                    frame.progress_state = Some(status.progress_state);
                    frame.output = status.output;
                    frame.error = status.error;
                    frame.timestamp = Some(status.timestamp);
                }
                Err(_) => frame.data = Some(msg.payload.clone()),
            }
        }
        _ => frame.data = Some(msg.payload.clone()),
    }
    frame
}

fn encode(frame: &WsMessage) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            warn!(error = %e, "failed to encode ws frame");
            None
        }
    }
}

async fn run(state: AppState, session: Arc<Session>, socket: WebSocket) {
    let router = Arc::clone(&state.router);
    let sessions = Arc::clone(router.sessions());
    let (channel, mut rx) = sessions.attach_channel(&session, ChannelKind::Ws);
    let release = ChannelRelease {
        sessions,
        session: Arc::clone(&session),
        channel_id: channel.id(),
    };
    let closed = channel.closed_token();
    let session_closed = session.closed_token();
    let (mut sink, mut stream) = socket.split();

    let mut ticker = tokio::time::interval(state.config.timeouts.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let handler = InboundHandler {
        router,
        session: Arc::clone(&session),
        channel: Arc::clone(&channel),
    };

    let mut outgoing = encode(&to_ws(&PushMessage::ping()));
    loop {
        if let Some(message) = outgoing.take() {
            if let Err(e) = sink.send(message).await {
                debug!(session_id = %session.id(), error = %e, "ws write failed");
                break;
            }
        }

        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => outgoing = encode(&to_ws(&msg)),
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    session.touch();
                    outgoing = handler.handle_text(&text).and_then(|f| encode(&f));
                }
                Some(Ok(Message::Binary(data))) => {
                    session.touch();
                    outgoing = match std::str::from_utf8(&data) {
                        Ok(text) => handler.handle_text(text).and_then(|f| encode(&f)),
                        Err(_) => None,
                    };
                }
                Some(Ok(Message::Ping(data))) => outgoing = Some(Message::Pong(data)),
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!(session_id = %session.id(), "ws close received");
                    break;
                }
                Some(Err(e)) => {
                    warn!(session_id = %session.id(), error = %e, "ws error");
                    break;
                }
            },
            _ = ticker.tick() => outgoing = encode(&to_ws(&PushMessage::ping())),
            _ = closed.cancelled() => break,
            _ = session_closed.cancelled() => break,
        }
    }

    let _ = sink.close().await;
    info!(session_id = %session.id(), channel_id = release.channel_id, "ws connection closed");
}

/// Operations sent by the client over the socket.
struct InboundHandler {
    router: Arc<Router>,
    session: Arc<Session>,
    channel: Arc<PushChannel>,
}

impl InboundHandler {
    /// Handle one text frame. Returns an immediate reply, if any.
    fn handle_text(&self, text: &str) -> Option<WsMessage> {
        let frame: WsMessage = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(session_id = %self.session.id(), error = %e, "malformed ws frame");
                return None;
            }
        };
        let message_type = frame.message_type;
        match self.handle_frame(frame) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(
                    session_id = %self.session.id(),
                    message_type = ?message_type,
                    error = %e,
                    "ws operation rejected"
                );
                None
            }
        }
    }

    fn handle_frame(&self, frame: WsMessage) -> ApiResult<Option<WsMessage>> {
        let thing_id = or_wildcard(&frame.thing_id);
        let name = or_wildcard(&frame.name);
        let router = &self.router;
        let session = &self.session;

        match frame.message_type {
            WsMessageType::Ping => Ok(Some(WsMessage::new(WsMessageType::Ping, "", ""))),
            WsMessageType::Subscribe => {
                router.set_interest(Operation::Subscribe, session, thing_id, name)?;
                Ok(None)
            }
            WsMessageType::Unsubscribe => {
                router.set_interest(Operation::Unsubscribe, session, thing_id, name)?;
                Ok(None)
            }
            WsMessageType::Observe => {
                router.set_interest(Operation::Observe, session, thing_id, name)?;
                Ok(None)
            }
            WsMessageType::Unobserve => {
                router.set_interest(Operation::Unobserve, session, thing_id, name)?;
                Ok(None)
            }
            WsMessageType::Event => {
                require_agent(session)?;
                let value = agent_value(&frame);
                router.publish_event(session, &frame.thing_id, &frame.name, value)?;
                Ok(None)
            }
            WsMessageType::Property => {
                // The owner reports a value; anyone else requests a write.
                let owned = router
                    .digitwin()
                    .owner_of(&frame.thing_id)
                    .map(|owner| owner == session.client_id())
                    .unwrap_or(false);
                if owned {
                    require_agent(session)?;
                    let value = agent_value(&frame);
                    router.update_property(session, &frame.thing_id, &frame.name, value)?;
                } else {
                    require_operator(session)?;
                    let value = frame.data.clone().unwrap_or(Value::Null);
                    self.spawn_forward(Operation::WriteProperty, frame, value);
                }
                Ok(None)
            }
            WsMessageType::Action => {
                require_operator(session)?;
                let input = frame.input.clone().or_else(|| frame.data.clone()).unwrap_or(Value::Null);
                self.spawn_forward(Operation::InvokeAction, frame, input);
                Ok(None)
            }
            WsMessageType::ActionStatus => {
                require_agent(session)?;
                let status = status_from_frame(frame)?;
                router.handle_action_status(session, status)?;
                Ok(None)
            }
        }
    }

    /// Forward a request without blocking the socket loop. The delivered or
    /// failed envelope comes back on this channel as `actionStatus`, the
    /// terminal status follows as a push.
    fn spawn_forward(&self, op: Operation, frame: WsMessage, input: Value) {
        let router = Arc::clone(&self.router);
        let session = Arc::clone(&self.session);
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            let result = match op {
                Operation::WriteProperty => {
                    router
                        .write_property(&session, &frame.thing_id, &frame.name, input, InvokeMode::Async)
                        .await
                }
                _ => {
                    router
                        .invoke_action(&session, &frame.thing_id, &frame.name, input, InvokeMode::Async)
                        .await
                }
            };
            let status = match result {
                Ok(reply) => reply.status().clone(),
                Err(e) => {
                    let request_id = frame.request_id.clone().unwrap_or_default();
                    ActionStatus::new(request_id, &frame.thing_id, &frame.name, ProgressState::Pending)
                        .failed(e.kind.as_str())
                }
            };
            let payload = match serde_json::to_value(&status) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to encode action status");
                    return;
                }
            };
            let msg = PushMessage::new(
                PushKind::ActionStatus,
                status.thing_id.clone(),
                status.name.clone(),
                session.client_id(),
                payload,
            )
            .with_request_id(status.request_id.clone());
            channel.try_push(Arc::new(msg));
        });
    }
}

fn or_wildcard(value: &str) -> &str {
    if value.is_empty() {
        WILDCARD
    } else {
        value
    }
}

fn agent_value(frame: &WsMessage) -> AgentValue {
    AgentValue {
        value: frame.data.clone().unwrap_or(Value::Null),
        timestamp: frame.timestamp,
    }
}

fn status_from_frame(frame: WsMessage) -> ApiResult<ActionStatus> {
    let request_id = frame
        .request_id
        .ok_or_else(|| ApiError::bad_request("actionStatus without requestID"))?;
    let progress_state = frame
        .progress_state
        .ok_or_else(|| ApiError::bad_request("actionStatus without progressState"))?;
    let mut status = ActionStatus::new(request_id, frame.thing_id, frame.name, progress_state);
    status.output = frame.output.or(frame.data);
    status.error = frame.error;
    if let Some(timestamp) = frame.timestamp {
        status.timestamp = timestamp;
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_frame() {
        let msg = PushMessage::new(PushKind::Event, "T1", "temperature", "A", json!(21.5));
        let frame = to_ws(&msg);
        assert_eq!(frame.message_type, WsMessageType::Event);
        assert_eq!(frame.data, Some(json!(21.5)));
        assert_eq!(frame.sender_id.as_deref(), Some("A"));
        assert!(frame.request_id.is_none());
    }

    #[test]
    fn test_invoke_frame_carries_input_and_request_id() {
        let msg = PushMessage::new(PushKind::InvokeAction, "T1", "toggle", "C", json!(true))
            .with_request_id("r1");
        let frame = to_ws(&msg);
        assert_eq!(frame.message_type, WsMessageType::Action);
        assert_eq!(frame.input, Some(json!(true)));
        assert_eq!(frame.request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_action_status_frame_unpacks_envelope() {
        let status = ActionStatus::new("r1", "T1", "toggle", ProgressState::Completed)
            .with_output(json!("on"));
        let msg = PushMessage::new(
            PushKind::ActionStatus,
            "T1",
            "toggle",
            "A",
            serde_json::to_value(&status).unwrap(),
        )
        .with_request_id("r1");
        let frame = to_ws(&msg);
        assert_eq!(frame.progress_state, Some(ProgressState::Completed));
        assert_eq!(frame.output, Some(json!("on")));
        assert!(frame.data.is_none());
    }

    #[test]
    fn test_status_from_frame_requires_request_id() {
        let mut frame = WsMessage::new(WsMessageType::ActionStatus, "T1", "toggle");
        frame.progress_state = Some(ProgressState::Running);
        assert!(status_from_frame(frame.clone()).is_err());
        frame.request_id = Some("r1".into());
        let status = status_from_frame(frame).unwrap();
        assert_eq!(status.progress_state, ProgressState::Running);
    }

    #[test]
    fn test_empty_names_mean_wildcard() {
        assert_eq!(or_wildcard(""), "+");
        assert_eq!(or_wildcard("T1"), "T1");
    }
}
