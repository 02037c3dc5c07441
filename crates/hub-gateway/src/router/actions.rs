//! Forwarded request records and the progress state machine.

use crate::domain::{RequestId, SessionId};
use dashmap::DashMap;
use hub_types::{ActionStatus, ProgressState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What was forwarded to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    InvokeAction,
    WriteProperty,
}

/// A consumer request forwarded to an agent.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub request_id: RequestId,
    pub kind: ForwardKind,
    pub thing_id: String,
    pub name: String,
    pub agent_id: String,
    pub consumer_session: SessionId,
    pub consumer_client: String,
    pub created_at: Instant,
    pub status: ActionStatus,
}

/// Result of applying a status update to a record
#[derive(Debug, Clone)]
pub enum Advance {
    /// No record for the request id (never existed or collected)
    Unknown,
    /// The update would move the state backwards; dropped
    Stale(ActionRecord),
    /// The record was already terminal; deliver as fire-and-forget only
    AfterTerminal(ActionRecord),
    /// Non-terminal progress recorded
    Progress(ActionRecord),
    /// First terminal status recorded
    Terminal(ActionRecord),
}

impl Advance {
    /// The record as it stands after the update, if it exists.
    pub fn into_record(self) -> Option<ActionRecord> {
        match self {
            Self::Unknown => None,
            Self::Stale(r) | Self::AfterTerminal(r) | Self::Progress(r) | Self::Terminal(r) => Some(r),
        }
    }
}

/// Live forwarded requests, kept until their lifetime expires.
pub struct ActionTracker {
    active: DashMap<RequestId, ActionRecord>,
    lifetime: Duration,
}

impl ActionTracker {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            active: DashMap::new(),
            lifetime,
        }
    }

    pub fn begin(&self, record: ActionRecord) {
        self.active.insert(record.request_id, record);
    }

    pub fn get(&self, request_id: &RequestId) -> Option<ActionRecord> {
        self.active.get(request_id).map(|r| r.clone())
    }

    /// Apply an agent status update.
    ///
    /// States only move forward and a record turns terminal at most once.
    /// The stored status keeps the record's thing, name and input, and is
    /// stamped with the hub's receive time.
    pub fn advance(&self, request_id: &RequestId, update: &ActionStatus) -> Advance {
        let Some(mut entry) = self.active.get_mut(request_id) else {
            return Advance::Unknown;
        };
        let record = entry.value_mut();
        let current = record.status.progress_state;
        if current.is_terminal() {
            return Advance::AfterTerminal(record.clone());
        }
        if !current.can_advance_to(update.progress_state) {
            return Advance::Stale(record.clone());
        }
        record.status.progress_state = update.progress_state;
        record.status.timestamp = chrono::Utc::now();
        if update.output.is_some() {
            record.status.output = update.output.clone();
        }
        if update.error.is_some() {
            record.status.error = update.error.clone();
        }
        if update.progress_state.is_terminal() {
            Advance::Terminal(record.clone())
        } else {
            Advance::Progress(record.clone())
        }
    }

    /// Mark a non-terminal record failed.
    ///
    /// Returns `Terminal` only when this call made the transition and
    /// `AfterTerminal` when another status got there first.
    pub fn fail(&self, request_id: &RequestId, reason: &str) -> Advance {
        let Some(mut entry) = self.active.get_mut(request_id) else {
            return Advance::Unknown;
        };
        let record = entry.value_mut();
        if record.status.progress_state.is_terminal() {
            return Advance::AfterTerminal(record.clone());
        }
        record.status.progress_state = ProgressState::Failed;
        record.status.error = Some(reason.to_string());
        record.status.timestamp = chrono::Utc::now();
        Advance::Terminal(record.clone())
    }

    /// Set a record's state if it is not terminal yet.
    pub fn mark(&self, request_id: &RequestId, state: ProgressState) -> Option<ActionRecord> {
        let mut entry = self.active.get_mut(request_id)?;
        let record = entry.value_mut();
        if record.status.progress_state.can_advance_to(state) {
            record.status.progress_state = state;
            record.status.timestamp = chrono::Utc::now();
        }
        Some(record.clone())
    }

    /// Drop records older than the lifetime.
    pub fn collect_expired(&self, now: Instant) -> usize {
        let before = self.active.len();
        self.active
            .retain(|_, record| now.saturating_duration_since(record.created_at) <= self.lifetime);
        before - self.active.len()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Records that have not reached a terminal state.
    pub fn pending_count(&self) -> usize {
        self.active
            .iter()
            .filter(|r| !r.status.progress_state.is_terminal())
            .count()
    }

    /// Spawn the periodic record collector.
    pub fn spawn_gc(
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
                        let collected = self.collect_expired(Instant::now());
                        if collected > 0 {
                            tracing::debug!(collected, "expired action records collected");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(request_id: RequestId) -> ActionRecord {
        ActionRecord {
            request_id,
            kind: ForwardKind::InvokeAction,
            thing_id: "T1".into(),
            name: "toggle".into(),
            agent_id: "A".into(),
            consumer_session: SessionId::new(),
            consumer_client: "C".into(),
            created_at: Instant::now(),
            status: ActionStatus::new(request_id.to_string(), "T1", "toggle", ProgressState::Pending),
        }
    }

    fn update(state: ProgressState) -> ActionStatus {
        ActionStatus::new("", "", "", state)
    }

    #[test]
    fn test_forward_progress() {
        let tracker = ActionTracker::new(Duration::from_secs(60));
        let id = RequestId::new();
        tracker.begin(record(id));

        assert!(matches!(tracker.advance(&id, &update(ProgressState::Delivered)), Advance::Progress(_)));
        assert!(matches!(tracker.advance(&id, &update(ProgressState::Running)), Advance::Progress(_)));
        // backwards
        assert!(matches!(tracker.advance(&id, &update(ProgressState::Delivered)), Advance::Stale(_)));

        let done = update(ProgressState::Completed);
        let Advance::Terminal(rec) = tracker.advance(&id, &done.with_output(serde_json::json!("on"))) else {
            panic!("expected terminal");
        };
        assert_eq!(rec.status.output, Some(serde_json::json!("on")));
        assert_eq!(rec.status.thing_id, "T1");

        assert!(matches!(
            tracker.advance(&id, &update(ProgressState::Failed)),
            Advance::AfterTerminal(_)
        ));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_fail_after_terminal_keeps_terminal() {
        let tracker = ActionTracker::new(Duration::from_secs(60));
        let id = RequestId::new();
        tracker.begin(record(id));
        tracker.advance(&id, &update(ProgressState::Completed));
        let Advance::AfterTerminal(rec) = tracker.fail(&id, "timeout") else {
            panic!("expected the completion to win");
        };
        assert_eq!(rec.status.progress_state, ProgressState::Completed);
        assert!(rec.status.error.is_none());
    }

    #[test]
    fn test_fail_transitions_once() {
        let tracker = ActionTracker::new(Duration::from_secs(60));
        let id = RequestId::new();
        tracker.begin(record(id));
        let Advance::Terminal(rec) = tracker.fail(&id, "timeout") else {
            panic!("expected the failure to be recorded");
        };
        assert_eq!(rec.status.error.as_deref(), Some("timeout"));
        assert!(matches!(tracker.fail(&id, "cancelled"), Advance::AfterTerminal(_)));
        assert!(matches!(
            tracker.advance(&id, &update(ProgressState::Completed)),
            Advance::AfterTerminal(_)
        ));
        assert!(matches!(tracker.fail(&RequestId::new(), "timeout"), Advance::Unknown));
    }

    #[test]
    fn test_progress_stamped_with_receive_time() {
        let tracker = ActionTracker::new(Duration::from_secs(60));
        let id = RequestId::new();
        tracker.begin(record(id));
        let mut done = update(ProgressState::Completed);
        done.timestamp = chrono::Utc::now() - chrono::Duration::seconds(30);
        let before = chrono::Utc::now();
        let Advance::Terminal(rec) = tracker.advance(&id, &done) else {
            panic!("expected terminal");
        };
        assert!(rec.status.timestamp >= before);
    }

    #[test]
    fn test_unknown_request() {
        let tracker = ActionTracker::new(Duration::from_secs(60));
        assert!(matches!(
            tracker.advance(&RequestId::new(), &update(ProgressState::Completed)),
            Advance::Unknown
        ));
    }

    #[test]
    fn test_collect_expired() {
        let tracker = ActionTracker::new(Duration::from_millis(10));
        tracker.begin(record(RequestId::new()));
        assert_eq!(tracker.collect_expired(Instant::now()), 0);
        assert_eq!(tracker.collect_expired(Instant::now() + Duration::from_secs(1)), 1);
        assert!(tracker.is_empty());
    }

    fn state() -> impl Strategy<Value = ProgressState> {
        prop_oneof![
            Just(ProgressState::Pending),
            Just(ProgressState::Delivered),
            Just(ProgressState::Running),
            Just(ProgressState::Completed),
            Just(ProgressState::Failed),
        ]
    }

    proptest! {
        #[test]
        fn prop_single_terminal_transition(updates in proptest::collection::vec(state(), 0..16)) {
            let tracker = ActionTracker::new(Duration::from_secs(60));
            let id = RequestId::new();
            tracker.begin(record(id));
            let terminals = updates
                .iter()
                .filter(|s| matches!(tracker.advance(&id, &update(**s)), Advance::Terminal(_)))
                .count();
            prop_assert!(terminals <= 1);
        }
    }
}
