//! Push channels.
//!
//! A push channel is the bounded outbound queue behind one SSE stream or one
//! WebSocket. The transport writer loop owns the receiving half.

use hub_types::PushMessage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Push sub-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Sse,
    Ws,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Sse => f.write_str("sse"),
            ChannelKind::Ws => f.write_str("ws"),
        }
    }
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Queue full; the channel has been closed
    Full,
    /// Writer already gone
    Closed,
}

/// Outbound half of a push channel.
pub struct PushChannel {
    id: u64,
    kind: ChannelKind,
    tx: mpsc::Sender<Arc<PushMessage>>,
    closed: CancellationToken,
}

impl PushChannel {
    /// Create a channel and the receiver its writer loop drains.
    pub fn new(
        kind: ChannelKind,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<PushMessage>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel = Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            tx,
            closed: CancellationToken::new(),
        });
        (channel, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Enqueue without waiting. A full queue closes the channel.
    pub fn try_push(&self, msg: Arc<PushMessage>) -> Enqueue {
        if self.is_closed() {
            return Enqueue::Closed;
        }
        match self.tx.try_send(msg) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => {
                self.close();
                Enqueue::Full
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                Enqueue::Closed
            }
        }
    }

    /// Enqueue, waiting up to `timeout` for queue capacity.
    pub async fn push_timeout(&self, msg: Arc<PushMessage>, timeout: Duration) -> Enqueue {
        if self.is_closed() {
            return Enqueue::Closed;
        }
        match self.tx.send_timeout(msg, timeout).await {
            Ok(()) => Enqueue::Queued,
            Err(SendTimeoutError::Timeout(_)) => Enqueue::Full,
            Err(SendTimeoutError::Closed(_)) => {
                self.close();
                Enqueue::Closed
            }
        }
    }

    pub fn has_capacity(&self) -> bool {
        !self.is_closed() && self.tx.capacity() > 0
    }

    /// Signal the writer loop to stop.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Token cancelled when the channel is closed from the hub side.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushChannel")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}
