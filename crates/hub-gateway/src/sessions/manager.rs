//! Session index and lifecycle.

use super::channel::{ChannelKind, PushChannel};
use super::session::{PushReport, Session, SessionOrigin};
use super::SessionError;
use crate::authn::Role;
use crate::domain::{HubStats, SessionId};
use hub_types::PushMessage;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Notified after a session is removed from the index.
pub trait SessionListener: Send + Sync {
    fn on_session_closed(&self, session_id: SessionId, client_id: &str);
}

/// Session manager tunables
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub channel_capacity: usize,
    pub max_frame_size: usize,
    pub reconnect_grace: Duration,
    pub session_idle: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_frame_size: 256 * 1024,
            reconnect_grace: Duration::from_secs(300),
            session_idle: Duration::from_secs(3600),
        }
    }
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<SessionId, Arc<Session>>,
    by_client: HashMap<String, HashSet<SessionId>>,
}

/// Owns the authoritative set of live sessions and their push channels.
pub struct SessionManager {
    indexes: RwLock<Indexes>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    limits: SessionLimits,
    stats: Arc<HubStats>,
}

impl SessionManager {
    pub fn new(limits: SessionLimits, stats: Arc<HubStats>) -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
            listeners: RwLock::new(Vec::new()),
            limits,
            stats,
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.write().push(listener);
    }

    /// Register a new session.
    pub fn create(
        &self,
        client_id: &str,
        role: Role,
        origin: SessionOrigin,
        remote_addr: Option<SocketAddr>,
        session_id: SessionId,
    ) -> Result<Arc<Session>, SessionError> {
        if client_id.is_empty() {
            return Err(SessionError::EmptyClientId);
        }
        let session = Arc::new(Session::new(
            session_id,
            client_id,
            role,
            origin,
            remote_addr,
        ));
        {
            let mut idx = self.indexes.write();
            if idx.by_id.contains_key(&session_id) {
                return Err(SessionError::Duplicate(session_id));
            }
            idx.by_id.insert(session_id, session.clone());
            idx.by_client
                .entry(client_id.to_string())
                .or_default()
                .insert(session_id);
        }
        tracing::info!(
            session_id = %session_id,
            client_id,
            role = %role,
            remote_addr = ?remote_addr,
            "session created"
        );
        Ok(session)
    }

    pub fn lookup(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.indexes.read().by_id.get(session_id).cloned()
    }

    pub fn lookup_by_client(&self, client_id: &str) -> Vec<Arc<Session>> {
        let idx = self.indexes.read();
        idx.by_client
            .get(client_id)
            .map(|ids| ids.iter().filter_map(|id| idx.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Session for a request carrying an agent token: the most recently
    /// active token session of the client, or a new one.
    pub fn agent_session(
        &self,
        client_id: &str,
        role: Role,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Arc<Session>, SessionError> {
        let existing = self
            .lookup_by_client(client_id)
            .into_iter()
            .filter(|s| s.origin() == SessionOrigin::AgentToken && !s.is_closed())
            .max_by_key(|s| s.last_activity());
        if let Some(session) = existing {
            return Ok(session);
        }
        self.create(
            client_id,
            role,
            SessionOrigin::AgentToken,
            remote_addr,
            SessionId::new(),
        )
    }

    /// Attach a new push channel to `session`.
    pub fn attach_channel(
        &self,
        session: &Session,
        kind: ChannelKind,
    ) -> (Arc<PushChannel>, mpsc::Receiver<Arc<PushMessage>>) {
        let (channel, rx) = session.attach(kind, self.limits.channel_capacity);
        tracing::info!(
            session_id = %session.id(),
            client_id = session.client_id(),
            channel_id = channel.id(),
            kind = %kind,
            "push channel attached"
        );
        (channel, rx)
    }

    /// Release a channel after its writer loop ended.
    pub fn release_channel(&self, session: &Session, channel_id: u64) {
        let remaining = session.detach(channel_id);
        tracing::info!(
            session_id = %session.id(),
            client_id = session.client_id(),
            channel_id,
            remaining,
            "push channel released"
        );
    }

    /// Close a session and remove both index entries. Idempotent.
    pub fn close(&self, session_id: &SessionId) -> bool {
        let removed = {
            let mut idx = self.indexes.write();
            let removed = idx.by_id.remove(session_id);
            if let Some(session) = &removed {
                if let Some(ids) = idx.by_client.get_mut(session.client_id()) {
                    ids.remove(session_id);
                    if ids.is_empty() {
                        idx.by_client.remove(session.client_id());
                    }
                }
            }
            removed
        };
        let Some(session) = removed else {
            return false;
        };
        session.close();
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_session_closed(*session_id, session.client_id());
        }
        tracing::info!(session_id = %session_id, client_id = session.client_id(), "session closed");
        true
    }

    /// Close every session. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self.indexes.read().by_id.keys().copied().collect();
        ids.iter().filter(|id| self.close(id)).count()
    }

    /// Reject payloads larger than the frame limit before anything is
    /// stored or queued.
    pub fn check_payload(&self, payload: &serde_json::Value) -> Result<(), SessionError> {
        let size = serde_json::to_vec(payload)
            .map(|v| v.len())
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        if size > self.limits.max_frame_size {
            return Err(SessionError::FrameTooLarge {
                size,
                max: self.limits.max_frame_size,
            });
        }
        Ok(())
    }

    fn check_frame(&self, msg: &PushMessage) -> Result<(), SessionError> {
        self.check_payload(&msg.payload).inspect_err(|_| {
            HubStats::incr(&self.stats.dropped_pushes);
        })
    }

    fn account(&self, report: PushReport) {
        for _ in 0..report.slow_closed {
            HubStats::incr(&self.stats.slow_consumer_closes);
        }
        if report.delivered == 0 {
            HubStats::incr(&self.stats.dropped_pushes);
        }
    }

    /// Push to every channel of one session.
    pub fn push(&self, session: &Session, msg: Arc<PushMessage>) -> Result<PushReport, SessionError> {
        self.check_frame(&msg)?;
        let report = session.push(&msg);
        self.account(report);
        Ok(report)
    }

    /// Push to a session by id.
    pub fn push_to_session(
        &self,
        session_id: &SessionId,
        msg: Arc<PushMessage>,
    ) -> Result<PushReport, SessionError> {
        let session = self
            .lookup(session_id)
            .ok_or(SessionError::NotFound(*session_id))?;
        self.push(&session, msg)
    }

    /// Push to a set of sessions. Unknown ids are skipped.
    pub fn push_to_sessions<'a>(
        &self,
        session_ids: impl IntoIterator<Item = &'a SessionId>,
        msg: Arc<PushMessage>,
    ) -> Result<usize, SessionError> {
        self.check_frame(&msg)?;
        let sessions: Vec<Arc<Session>> = {
            let idx = self.indexes.read();
            session_ids
                .into_iter()
                .filter_map(|id| idx.by_id.get(id).cloned())
                .collect()
        };
        let mut delivered = 0;
        for session in sessions {
            let report = session.push(&msg);
            self.account(report);
            if report.delivered > 0 {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    pub fn session_count(&self) -> usize {
        self.indexes.read().by_id.len()
    }

    pub fn channel_count(&self) -> usize {
        self.indexes
            .read()
            .by_id
            .values()
            .map(|s| s.channel_count())
            .sum()
    }

    /// Close sessions whose channels have been gone longer than the
    /// reconnect grace, or that never attached and sat idle.
    pub fn reap(&self, now: Instant) -> usize {
        let expired: Vec<SessionId> = {
            let idx = self.indexes.read();
            idx.by_id
                .values()
                .filter(|s| s.channel_count() == 0)
                .filter(|s| match s.detached_at() {
                    Some(at) => now.saturating_duration_since(at) > self.limits.reconnect_grace,
                    None if !s.ever_attached() => {
                        now.saturating_duration_since(s.last_activity()) > self.limits.session_idle
                    }
                    None => false,
                })
                .map(|s| s.id())
                .collect()
        };
        let mut reaped = 0;
        for id in expired {
            if self.close(&id) {
                HubStats::incr(&self.stats.sessions_reaped);
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::debug!(reaped, "expired sessions closed");
        }
        reaped
    }

    /// Spawn the periodic session reaper.
    pub fn spawn_reaper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.reap(Instant::now());
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}
