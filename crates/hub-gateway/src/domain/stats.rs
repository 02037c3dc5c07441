//! Runtime counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics shared by the session manager and the router
#[derive(Debug, Default)]
pub struct HubStats {
    /// Push channels closed because their queue was full
    pub slow_consumer_closes: AtomicU64,
    /// Pushes dropped (oversized, or no channel attached)
    pub dropped_pushes: AtomicU64,
    /// Reply slots resolved with a terminal status
    pub correlations_completed: AtomicU64,
    /// Reply slots that expired before a terminal status
    pub correlation_timeouts: AtomicU64,
    /// Status updates delivered as pushes after their slot was gone
    pub late_deliveries: AtomicU64,
    /// Sessions removed by the reaper
    pub sessions_reaped: AtomicU64,
}

impl HubStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            slow_consumer_closes: self.slow_consumer_closes.load(Ordering::Relaxed),
            dropped_pushes: self.dropped_pushes.load(Ordering::Relaxed),
            correlations_completed: self.correlations_completed.load(Ordering::Relaxed),
            correlation_timeouts: self.correlation_timeouts.load(Ordering::Relaxed),
            late_deliveries: self.late_deliveries.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`HubStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub slow_consumer_closes: u64,
    pub dropped_pushes: u64,
    pub correlations_completed: u64,
    pub correlation_timeouts: u64,
    pub late_deliveries: u64,
    pub sessions_reaped: u64,
}
