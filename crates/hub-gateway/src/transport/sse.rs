//! Server-sent events push channel.
//!
//! Each frame carries `event: <kind>`, `id: {dThingID}/{name}/{senderID}/{requestID}`
//! and `data: <payload json>`. The first frame is always a `ping`.

use super::AppState;
use crate::middleware::AuthContext;
use crate::sessions::{ChannelKind, Session, SessionManager};
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::Stream;
use hub_types::PushMessage;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Detaches the channel from its session when the stream is dropped.
pub(crate) struct ChannelRelease {
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) session: Arc<Session>,
    pub(crate) channel_id: u64,
}

impl Drop for ChannelRelease {
    fn drop(&mut self) {
        self.sessions.release_channel(&self.session, self.channel_id);
    }
}

/// Render a push message as an SSE event.
pub fn to_event(msg: &PushMessage) -> Event {
    let data = serde_json::to_string(&msg.payload).unwrap_or_else(|_| "null".to_string());
    Event::default()
        .event(msg.kind.as_str())
        .id(sanitize(msg.sse_id()))
        .data(data)
}

// Field values must not contain line breaks.
fn sanitize(value: String) -> String {
    if value.contains(['\n', '\r']) {
        value.replace(['\n', '\r'], "")
    } else {
        value
    }
}

/// `GET /sse`
pub async fn connect(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sessions = Arc::clone(state.router.sessions());
    let session = auth.session;
    let (channel, mut rx) = sessions.attach_channel(&session, ChannelKind::Sse);
    let ping_interval = state.config.timeouts.ping_interval;

    let stream = async_stream::stream! {
        let release = ChannelRelease {
            sessions,
            session: Arc::clone(&session),
            channel_id: channel.id(),
        };
        let closed = channel.closed_token();
        let session_closed = session.closed_token();

        let mut ticker = tokio::time::interval(ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        yield Ok(to_event(&PushMessage::ping()));

        loop {
            let next = tokio::select! {
                msg = rx.recv() => msg.map(|m| to_event(&m)),
                _ = ticker.tick() => Some(to_event(&PushMessage::ping())),
                _ = closed.cancelled() => None,
                _ = session_closed.cancelled() => None,
            };
            match next {
                Some(event) => yield Ok(event),
                None => break,
            }
        }

        debug!(
            session_id = %release.session.id(),
            channel_id = release.channel_id,
            "sse stream ended"
        );
        drop(release);
    };

    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_types::PushKind;
    use serde_json::json;

    #[test]
    fn test_sanitize_strips_line_breaks() {
        assert_eq!(sanitize("a\nb\rc".into()), "abc");
        assert_eq!(sanitize("T1/x/A/".into()), "T1/x/A/");
    }

    #[test]
    fn test_event_renders_without_panic() {
        let msg = PushMessage::new(PushKind::Event, "T\n1", "temperature", "A", json!(21.5));
        let _event = to_event(&msg);
    }
}
