//! One authenticated client context.

use super::channel::{ChannelKind, Enqueue, PushChannel};
use crate::authn::Role;
use crate::domain::{RequestId, SessionId};
use chrono::{DateTime, Utc};
use hub_types::{ActionStatus, PushMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// How the session came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// `POST /authn/login`
    Login,
    /// First request carrying a reusable agent token
    AgentToken,
}

/// Outcome of pushing one message to every channel of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    /// Channels closed because their queue was full
    pub slow_closed: usize,
}

/// An authenticated client session.
///
/// Owns its push channels and its correlation map. Channels hold only the
/// session id.
pub struct Session {
    id: SessionId,
    client_id: String,
    role: Role,
    origin: SessionOrigin,
    remote_addr: Option<SocketAddr>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    channels: RwLock<Vec<Arc<PushChannel>>>,
    /// Set when the last channel detached; `None` while attached or if no
    /// channel ever attached.
    detached_at: Mutex<Option<Instant>>,
    ever_attached: Mutex<bool>,
    correlations: Mutex<HashMap<RequestId, oneshot::Sender<ActionStatus>>>,
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        client_id: impl Into<String>,
        role: Role,
        origin: SessionOrigin,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id,
            client_id: client_id.into(),
            role,
            origin,
            remote_addr,
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            channels: RwLock::new(Vec::new()),
            detached_at: Mutex::new(None),
            ever_attached: Mutex::new(false),
            correlations: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Cancelled when the session is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Create and attach a new push channel.
    pub(crate) fn attach(
        &self,
        kind: ChannelKind,
        capacity: usize,
    ) -> (Arc<PushChannel>, mpsc::Receiver<Arc<PushMessage>>) {
        let (channel, rx) = PushChannel::new(kind, capacity);
        if self.is_closed() {
            channel.close();
            return (channel, rx);
        }
        self.channels.write().push(channel.clone());
        *self.detached_at.lock() = None;
        *self.ever_attached.lock() = true;
        self.touch();
        (channel, rx)
    }

    /// Remove a channel. Returns the number of channels still attached.
    pub(crate) fn detach(&self, channel_id: u64) -> usize {
        let mut channels = self.channels.write();
        channels.retain(|c| {
            if c.id() == channel_id {
                c.close();
                false
            } else {
                true
            }
        });
        let remaining = channels.len();
        if remaining == 0 {
            *self.detached_at.lock() = Some(Instant::now());
        }
        remaining
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().iter().filter(|c| !c.is_closed()).count()
    }

    pub(crate) fn detached_at(&self) -> Option<Instant> {
        *self.detached_at.lock()
    }

    pub(crate) fn ever_attached(&self) -> bool {
        *self.ever_attached.lock()
    }

    /// Enqueue `msg` on every attached channel.
    ///
    /// Channels with a full queue are closed and removed.
    pub(crate) fn push(&self, msg: &Arc<PushMessage>) -> PushReport {
        let mut report = PushReport::default();
        let mut dead = Vec::new();
        {
            let channels = self.channels.read();
            for channel in channels.iter() {
                match channel.try_push(msg.clone()) {
                    Enqueue::Queued => report.delivered += 1,
                    Enqueue::Full => {
                        tracing::warn!(
                            session_id = %self.id,
                            client_id = %self.client_id,
                            channel_id = channel.id(),
                            "push queue full; closing slow channel"
                        );
                        report.slow_closed += 1;
                        dead.push(channel.id());
                    }
                    Enqueue::Closed => dead.push(channel.id()),
                }
            }
        }
        for id in dead {
            self.detach(id);
        }
        report
    }

    /// Attached channel with spare queue capacity, newest first.
    pub fn channel_with_capacity(&self) -> Option<Arc<PushChannel>> {
        self.channels
            .read()
            .iter()
            .rev()
            .find(|c| c.has_capacity())
            .cloned()
    }

    /// Any open channel, newest first.
    pub fn any_channel(&self) -> Option<Arc<PushChannel>> {
        self.channels
            .read()
            .iter()
            .rev()
            .find(|c| !c.is_closed())
            .cloned()
    }

    /// Install a reply slot for `request_id`.
    pub(crate) fn install_slot(&self, request_id: RequestId) -> oneshot::Receiver<ActionStatus> {
        let (tx, rx) = oneshot::channel();
        self.correlations.lock().insert(request_id, tx);
        rx
    }

    /// Resolve and release a reply slot. Returns false if there was no
    /// live slot (already resolved, evicted, or waiter gone).
    pub(crate) fn resolve_slot(&self, request_id: &RequestId, status: ActionStatus) -> bool {
        match self.correlations.lock().remove(request_id) {
            Some(tx) => tx.send(status).is_ok(),
            None => false,
        }
    }

    pub(crate) fn remove_slot(&self, request_id: &RequestId) {
        self.correlations.lock().remove(request_id);
    }

    pub fn pending_slots(&self) -> usize {
        self.correlations.lock().len()
    }

    /// Close every channel and drop every reply slot.
    pub(crate) fn close(&self) {
        self.closed.cancel();
        for channel in self.channels.write().drain(..) {
            channel.close();
        }
        self.correlations.lock().clear();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("role", &self.role)
            .field("origin", &self.origin)
            .field("channels", &self.channel_count())
            .finish()
    }
}
