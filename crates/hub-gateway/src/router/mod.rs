//! Operation routing.
//!
//! Every operation lands here after authentication. The router either
//! serves it from the digital twin, applies an agent notification to the
//! twin and fans it out, or forwards a consumer request to the owning agent
//! and correlates the reply.

mod actions;

pub use actions::{ActionRecord, ActionTracker, Advance, ForwardKind};

use crate::domain::{ApiError, ApiResult, HubStats, RequestId};
use crate::sessions::{Enqueue, Session, SessionManager};
use crate::subscriptions::{Namespace, SubscriptionRegistry};
use hub_digitwin::{DigitwinStore, UpsertOutcome};
use hub_types::{
    ActionStatus, AffordanceValue, AgentValue, Operation, ProgressState, PushKind, PushMessage,
    ThingDescription, TD_EVENT_NAME,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Adds protocol Forms to TDs handed to consumers.
pub trait TdDecorator: Send + Sync {
    fn decorate(&self, td: &mut ThingDescription);
}

/// Router timing
#[derive(Debug, Clone)]
pub struct RouterTimeouts {
    /// Wait for a terminal status on synchronous invocations
    pub request: Duration,
    /// Wait for capacity on the agent's push channel
    pub dispatch: Duration,
    /// Action record lifetime
    pub record_lifetime: Duration,
}

impl Default for RouterTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            dispatch: Duration::from_secs(3),
            record_lifetime: Duration::from_secs(60),
        }
    }
}

/// How the consumer wants the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    /// Wait for a terminal status up to the request timeout
    Sync,
    /// Return once delivered; the terminal status is pushed later
    Async,
}

/// Reply to a forwarded consumer request
#[derive(Debug, Clone)]
pub enum InvokeReply {
    Completed(ActionStatus),
    Failed(ActionStatus),
    /// Delivered to the agent, reply will be pushed
    Delivered(ActionStatus),
    /// No agent push channel could take the request
    Unavailable(ActionStatus),
}

impl InvokeReply {
    pub fn status(&self) -> &ActionStatus {
        match self {
            InvokeReply::Completed(s)
            | InvokeReply::Failed(s)
            | InvokeReply::Delivered(s)
            | InvokeReply::Unavailable(s) => s,
        }
    }
}

/// Removes a reply slot when the waiting request goes away.
struct SlotGuard<'a> {
    session: &'a Session,
    request_id: RequestId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.session.remove_slot(&self.request_id);
    }
}

/// The hub's single decision point.
pub struct Router {
    digitwin: Arc<DigitwinStore>,
    sessions: Arc<SessionManager>,
    subscriptions: Arc<SubscriptionRegistry>,
    actions: Arc<ActionTracker>,
    decorator: Option<Arc<dyn TdDecorator>>,
    stats: Arc<HubStats>,
    timeouts: RouterTimeouts,
}

impl Router {
    pub fn new(
        digitwin: Arc<DigitwinStore>,
        sessions: Arc<SessionManager>,
        subscriptions: Arc<SubscriptionRegistry>,
        stats: Arc<HubStats>,
        timeouts: RouterTimeouts,
    ) -> Self {
        Self {
            digitwin,
            sessions,
            subscriptions,
            actions: Arc::new(ActionTracker::new(timeouts.record_lifetime)),
            decorator: None,
            stats,
            timeouts,
        }
    }

    pub fn with_decorator(mut self, decorator: Arc<dyn TdDecorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }

    pub fn digitwin(&self) -> &Arc<DigitwinStore> {
        &self.digitwin
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    pub fn actions(&self) -> &Arc<ActionTracker> {
        &self.actions
    }

    pub fn stats(&self) -> &Arc<HubStats> {
        &self.stats
    }

    fn decorate(&self, mut td: ThingDescription) -> ThingDescription {
        if let Some(decorator) = &self.decorator {
            decorator.decorate(&mut td);
        }
        td
    }

    // -------------------------------------------------------------------------
    // Served from the digital twin
    // -------------------------------------------------------------------------

    pub fn read_thing(&self, thing_id: &str) -> ApiResult<ThingDescription> {
        Ok(self.decorate(self.digitwin.read_td(thing_id)?))
    }

    pub fn read_all_things(&self, offset: usize, limit: usize) -> Vec<ThingDescription> {
        self.digitwin
            .read_all_tds(offset, limit)
            .into_iter()
            .map(|td| self.decorate(td))
            .collect()
    }

    pub fn read_property(&self, thing_id: &str, name: &str) -> ApiResult<AffordanceValue> {
        Ok(self.digitwin.read_property(thing_id, name)?)
    }

    pub fn read_all_properties(&self, thing_id: &str) -> ApiResult<BTreeMap<String, AffordanceValue>> {
        Ok(self.digitwin.read_all_properties(thing_id)?)
    }

    pub fn read_event(&self, thing_id: &str, name: &str) -> ApiResult<AffordanceValue> {
        Ok(self.digitwin.read_event(thing_id, name)?)
    }

    pub fn read_all_events(&self, thing_id: &str) -> ApiResult<BTreeMap<String, AffordanceValue>> {
        Ok(self.digitwin.read_all_events(thing_id)?)
    }

    pub fn query_action(&self, thing_id: &str, name: &str) -> ApiResult<ActionStatus> {
        Ok(self.digitwin.query_action(thing_id, name)?)
    }

    pub fn query_all_actions(&self, thing_id: &str) -> ApiResult<BTreeMap<String, ActionStatus>> {
        Ok(self.digitwin.query_all_actions(thing_id)?)
    }

    /// Status of a forwarded request by id, while its record lives.
    pub fn query_request(&self, request_id: &RequestId) -> ApiResult<ActionStatus> {
        self.actions
            .get(request_id)
            .map(|r| r.status)
            .ok_or_else(|| ApiError::not_found(format!("request {} not found", request_id)))
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Add or remove a subscription or observation entry for `session`.
    pub fn set_interest(
        &self,
        op: Operation,
        session: &Session,
        thing_id: &str,
        name: &str,
    ) -> ApiResult<()> {
        let sid = session.id();
        let changed = match op {
            Operation::Subscribe => self.subscriptions.subscribe(sid, thing_id, name)?,
            Operation::Unsubscribe => self.subscriptions.unsubscribe(sid, thing_id, name)?,
            Operation::Observe => self.subscriptions.observe(sid, thing_id, name)?,
            Operation::Unobserve => self.subscriptions.unobserve(sid, thing_id, name)?,
            other => return Err(ApiError::bad_request(format!("{} is not a subscription operation", other))),
        };
        tracing::info!(
            op = %op,
            session_id = %sid,
            client_id = session.client_id(),
            dthing_id = thing_id,
            name,
            changed,
            "subscription updated"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Agent notifications
    // -------------------------------------------------------------------------

    fn fan_out(&self, ns: Namespace, msg: PushMessage) -> ApiResult<usize> {
        let targets = match ns {
            Namespace::Events => self.subscriptions.subscribers(&msg.thing_id, &msg.name),
            Namespace::Properties => self.subscriptions.observers(&msg.thing_id, &msg.name),
        };
        if targets.is_empty() {
            return Ok(0);
        }
        Ok(self.sessions.push_to_sessions(targets.iter(), Arc::new(msg))?)
    }

    /// Publish or replace a TD, then push it to `$td` subscribers.
    pub fn update_thing(&self, agent: &Session, td: ThingDescription) -> ApiResult<UpsertOutcome> {
        self.sessions.check_payload(&serde_json::to_value(&td)?)?;
        let (thing_id, outcome) = self.digitwin.upsert_td(agent.client_id(), td)?;
        tracing::info!(
            op = %Operation::UpdateThing,
            dthing_id = %thing_id,
            sender_id = agent.client_id(),
            ?outcome,
            "-> REQ"
        );
        let td = self.read_thing(&thing_id)?;
        let msg = PushMessage::new(
            PushKind::Event,
            thing_id,
            TD_EVENT_NAME,
            agent.client_id(),
            serde_json::to_value(&td)?,
        );
        self.fan_out(Namespace::Events, msg)?;
        Ok(outcome)
    }

    /// Remove a TD with its values and every entry naming it.
    pub fn remove_thing(&self, agent: &Session, thing_id: &str) -> ApiResult<()> {
        self.digitwin.remove_td(agent.client_id(), thing_id)?;
        self.subscriptions.remove_thing(thing_id);
        tracing::info!(
            op = %Operation::RemoveThing,
            dthing_id = thing_id,
            sender_id = agent.client_id(),
            "-> REQ"
        );
        Ok(())
    }

    /// Record an event value and push it to subscribers.
    ///
    /// Out-of-order values are dropped without fan-out.
    pub fn publish_event(
        &self,
        agent: &Session,
        thing_id: &str,
        name: &str,
        value: AgentValue,
    ) -> ApiResult<usize> {
        self.notify(Operation::PublishEvent, agent, thing_id, name, value)
    }

    /// Record a property value and push it to observers.
    pub fn update_property(
        &self,
        agent: &Session,
        thing_id: &str,
        name: &str,
        value: AgentValue,
    ) -> ApiResult<usize> {
        self.notify(Operation::UpdateProperty, agent, thing_id, name, value)
    }

    /// Update several properties at once with a shared timestamp.
    ///
    /// Either every value is accepted or none is stored.
    pub fn update_properties(
        &self,
        agent: &Session,
        thing_id: &str,
        values: BTreeMap<String, Value>,
    ) -> ApiResult<usize> {
        for value in values.values() {
            self.sessions.check_payload(value)?;
        }
        let timestamp = chrono::Utc::now();
        let batch = values
            .iter()
            .map(|(name, value)| {
                let stored = AffordanceValue::new(value.clone(), timestamp, agent.client_id());
                (name.clone(), stored)
            })
            .collect();
        let outcomes = self
            .digitwin
            .update_properties(thing_id, agent.client_id(), batch)?;

        let mut delivered = 0;
        for (name, outcome) in outcomes {
            tracing::info!(
                op = %Operation::UpdateProperty,
                dthing_id = thing_id,
                name = %name,
                sender_id = agent.client_id(),
                applied = outcome.is_applied(),
                "-> REQ"
            );
            if !outcome.is_applied() {
                continue;
            }
            let Some(payload) = values.get(&name) else {
                continue;
            };
            let msg = PushMessage::new(
                PushKind::Property,
                thing_id,
                name.as_str(),
                agent.client_id(),
                payload.clone(),
            )
            .with_timestamp(timestamp);
            delivered += self.fan_out(Namespace::Properties, msg)?;
        }
        Ok(delivered)
    }

    fn notify(
        &self,
        op: Operation,
        agent: &Session,
        thing_id: &str,
        name: &str,
        value: AgentValue,
    ) -> ApiResult<usize> {
        self.sessions.check_payload(&value.value)?;
        let timestamp = value.timestamp_or(chrono::Utc::now());
        let stored = AffordanceValue::new(value.value, timestamp, agent.client_id());
        let payload = stored.value.clone();

        let (outcome, kind, ns) = match op {
            Operation::PublishEvent => (
                self.digitwin.update_event(thing_id, name, stored)?,
                PushKind::Event,
                Namespace::Events,
            ),
            _ => (
                self.digitwin.update_property(thing_id, name, stored)?,
                PushKind::Property,
                Namespace::Properties,
            ),
        };
        tracing::info!(
            op = %op,
            dthing_id = thing_id,
            name,
            sender_id = agent.client_id(),
            applied = outcome.is_applied(),
            "-> REQ"
        );
        if !outcome.is_applied() {
            return Ok(0);
        }
        let msg = PushMessage::new(kind, thing_id, name, agent.client_id(), payload)
            .with_timestamp(timestamp);
        self.fan_out(ns, msg)
    }

    // -------------------------------------------------------------------------
    // Forwarded to the agent
    // -------------------------------------------------------------------------

    /// Forward an action invocation to the owning agent.
    pub async fn invoke_action(
        &self,
        consumer: &Session,
        thing_id: &str,
        name: &str,
        input: Value,
        mode: InvokeMode,
    ) -> ApiResult<InvokeReply> {
        self.digitwin.action_affordance(thing_id, name)?;
        self.forward(ForwardKind::InvokeAction, consumer, thing_id, name, input, mode)
            .await
    }

    /// Forward a property write to the owning agent.
    ///
    /// Read-only properties are rejected without contacting the agent.
    pub async fn write_property(
        &self,
        consumer: &Session,
        thing_id: &str,
        name: &str,
        value: Value,
        mode: InvokeMode,
    ) -> ApiResult<InvokeReply> {
        let affordance = self.digitwin.property_affordance(thing_id, name)?;
        if affordance.is_read_only() {
            return Err(ApiError::forbidden(format!(
                "property '{}' of '{}' is read-only",
                name, thing_id
            )));
        }
        self.forward(ForwardKind::WriteProperty, consumer, thing_id, name, value, mode)
            .await
    }

    async fn forward(
        &self,
        kind: ForwardKind,
        consumer: &Session,
        thing_id: &str,
        name: &str,
        input: Value,
        mode: InvokeMode,
    ) -> ApiResult<InvokeReply> {
        self.sessions.check_payload(&input)?;
        let agent_id = self.digitwin.owner_of(thing_id)?;
        let request_id = RequestId::new();
        let status = ActionStatus::new(request_id.to_string(), thing_id, name, ProgressState::Pending)
            .with_input(input.clone());
        self.actions.begin(ActionRecord {
            request_id,
            kind,
            thing_id: thing_id.to_string(),
            name: name.to_string(),
            agent_id: agent_id.clone(),
            consumer_session: consumer.id(),
            consumer_client: consumer.client_id().to_string(),
            created_at: Instant::now(),
            status: status.clone(),
        });
        self.record_status(kind, &status);

        let op = match kind {
            ForwardKind::InvokeAction => Operation::InvokeAction,
            ForwardKind::WriteProperty => Operation::WriteProperty,
        };
        tracing::info!(
            op = %op,
            dthing_id = thing_id,
            name,
            request_id = %request_id,
            sender_id = consumer.client_id(),
            agent_id = %agent_id,
            "-> REQ"
        );

        // Install the slot before dispatch so a fast reply is not missed.
        let slot = match mode {
            InvokeMode::Sync => Some(consumer.install_slot(request_id)),
            InvokeMode::Async => None,
        };
        let _guard = slot.as_ref().map(|_| SlotGuard {
            session: consumer,
            request_id,
        });

        let push_kind = match kind {
            ForwardKind::InvokeAction => PushKind::InvokeAction,
            ForwardKind::WriteProperty => PushKind::WriteProperty,
        };
        let msg = Arc::new(
            PushMessage::new(push_kind, thing_id, name, consumer.client_id(), input)
                .with_request_id(request_id.to_string()),
        );

        if !self.dispatch(&agent_id, msg).await {
            let record = self.actions.fail(&request_id, "unavailable").into_record();
            let status = record.map(|r| r.status).unwrap_or_else(|| status.failed("unavailable"));
            self.record_status(kind, &status);
            tracing::warn!(
                dthing_id = thing_id,
                name,
                request_id = %request_id,
                agent_id = %agent_id,
                "<- RESP no agent reachable"
            );
            return Ok(InvokeReply::Unavailable(status));
        }

        let delivered = self
            .actions
            .mark(&request_id, ProgressState::Delivered)
            .map(|r| r.status)
            .unwrap_or(status);
        self.record_status(kind, &delivered);

        let Some(mut slot) = slot else {
            return Ok(InvokeReply::Delivered(delivered));
        };

        let reply = tokio::time::timeout(self.timeouts.request, &mut slot).await;
        let status = match reply {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => {
                // Consumer session closed underneath the wait.
                self.actions
                    .fail(&request_id, "cancelled")
                    .into_record()
                    .map(|r| r.status)
                    .unwrap_or_else(|| delivered.clone().failed("cancelled"))
            }
            Err(_) => match self.actions.fail(&request_id, "timeout") {
                Advance::Terminal(record) => {
                    consumer.remove_slot(&request_id);
                    HubStats::incr(&self.stats.correlation_timeouts);
                    self.record_status(kind, &record.status);
                    record.status
                }
                other => {
                    // The agent's terminal status won the race and is on its
                    // way into the slot.
                    let recorded = other.into_record().map(|r| r.status);
                    match tokio::time::timeout(self.timeouts.dispatch, &mut slot).await {
                        Ok(Ok(status)) => status,
                        _ => recorded.unwrap_or_else(|| delivered.clone().failed("timeout")),
                    }
                }
            },
        };

        tracing::info!(
            op = %op,
            dthing_id = thing_id,
            name,
            request_id = %request_id,
            progress = %status.progress_state,
            "<- RESP"
        );
        Ok(match status.progress_state {
            ProgressState::Completed => InvokeReply::Completed(status),
            _ => InvokeReply::Failed(status),
        })
    }

    /// Enqueue a request on the most recently active agent session with
    /// spare channel capacity. Waits up to the dispatch timeout when every
    /// channel is full.
    async fn dispatch(&self, agent_id: &str, msg: Arc<PushMessage>) -> bool {
        let mut sessions = self.sessions.lookup_by_client(agent_id);
        sessions.sort_by_key(|s| std::cmp::Reverse(s.last_activity()));

        for session in &sessions {
            if let Some(channel) = session.channel_with_capacity() {
                if channel.try_push(msg.clone()) == Enqueue::Queued {
                    return true;
                }
                self.sessions.release_channel(session, channel.id());
            }
        }

        let Some(channel) = sessions.iter().find_map(|s| s.any_channel()) else {
            return false;
        };
        channel.push_timeout(msg, self.timeouts.dispatch).await == Enqueue::Queued
    }

    /// Apply a status update posted by the agent.
    pub fn handle_action_status(&self, agent: &Session, update: ActionStatus) -> ApiResult<()> {
        let request_id = RequestId::parse(&update.request_id)
            .map_err(|_| ApiError::bad_request(format!("invalid requestID '{}'", update.request_id)))?;
        let Some(record) = self.actions.get(&request_id) else {
            return Err(ApiError::not_found(format!("request {} not found", request_id)));
        };
        if record.agent_id != agent.client_id() {
            return Err(ApiError::forbidden(format!(
                "request {} was not sent to '{}'",
                request_id,
                agent.client_id()
            )));
        }
        self.sessions.check_payload(update.output.as_ref().unwrap_or(&Value::Null))?;

        tracing::info!(
            op = %Operation::UpdateActionStatus,
            dthing_id = %record.thing_id,
            name = %record.name,
            request_id = %request_id,
            sender_id = agent.client_id(),
            progress = %update.progress_state,
            "-> REQ"
        );

        match self.actions.advance(&request_id, &update) {
            Advance::Unknown => Err(ApiError::not_found(format!("request {} not found", request_id))),
            Advance::Stale(record) => {
                tracing::debug!(
                    request_id = %request_id,
                    current = %record.status.progress_state,
                    incoming = %update.progress_state,
                    "stale status update dropped"
                );
                Ok(())
            }
            Advance::AfterTerminal(record) => {
                // Late reply: the consumer already has its answer.
                let mut status = record.status.clone();
                status.progress_state = update.progress_state;
                status.output = update.output.clone().or(status.output);
                status.error = update.error.clone();
                status.timestamp = update.timestamp;
                HubStats::incr(&self.stats.late_deliveries);
                self.push_status(&record, agent.client_id(), status);
                Ok(())
            }
            Advance::Progress(record) => {
                self.record_status(record.kind, &record.status);
                self.push_status(&record, agent.client_id(), record.status.clone());
                Ok(())
            }
            Advance::Terminal(record) => {
                self.record_status(record.kind, &record.status);
                let resolved = self
                    .sessions
                    .lookup(&record.consumer_session)
                    .map(|s| s.resolve_slot(&request_id, record.status.clone()))
                    .unwrap_or(false);
                if resolved {
                    HubStats::incr(&self.stats.correlations_completed);
                } else {
                    self.push_status(&record, agent.client_id(), record.status.clone());
                }
                Ok(())
            }
        }
    }

    fn push_status(&self, record: &ActionRecord, sender_id: &str, status: ActionStatus) {
        let payload = match serde_json::to_value(&status) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode action status");
                return;
            }
        };
        let msg = PushMessage::new(
            PushKind::ActionStatus,
            record.thing_id.clone(),
            record.name.clone(),
            sender_id,
            payload,
        )
        .with_request_id(record.request_id.to_string());
        if let Err(e) = self.sessions.push_to_session(&record.consumer_session, Arc::new(msg)) {
            tracing::debug!(
                request_id = %record.request_id,
                session_id = %record.consumer_session,
                error = %e,
                "action status not delivered"
            );
        }
    }

    /// Keep the twin's latest action status current. Property writes are
    /// not recorded, the agent reports the new value itself.
    fn record_status(&self, kind: ForwardKind, status: &ActionStatus) {
        if kind != ForwardKind::InvokeAction {
            return;
        }
        if let Err(e) = self
            .digitwin
            .update_action_status(&status.thing_id, status.clone())
        {
            tracing::debug!(dthing_id = %status.thing_id, error = %e, "action status not recorded");
        }
    }
}
