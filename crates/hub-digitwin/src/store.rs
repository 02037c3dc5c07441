//! # Digitwin Store
//!
//! The union directory of TDs and the latest-value caches.
//!
//! ## Locking
//!
//! The directory map is behind one `RwLock` held only for map operations.
//! Each twin has its own `RwLock`: agent updates take it for writing,
//! consumer reads take it shared and clone out a consistent snapshot.
//! Lock order is always directory, then twin, then the dirty sets.

use crate::errors::DigitwinError;
use crate::twin::{ThingTwin, UpsertOutcome, WriteOutcome};
use hub_storage::{BatchOperation, SharedKvStore};
use hub_types::{
    dthing_id, validate_name, ActionAffordance, ActionStatus, AffordanceValue,
    PropertyAffordance, ThingDescription,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

/// Storage key prefix of twin records.
pub const TWIN_KEY_PREFIX: &str = "dtw:";

/// Twins read from the backend per cursor batch during replay.
const REPLAY_BATCH: usize = 300;

pub(crate) fn twin_key(dthing_id: &str) -> Vec<u8> {
    format!("{TWIN_KEY_PREFIX}{dthing_id}").into_bytes()
}

/// Digitwin behaviour settings.
#[derive(Debug, Clone)]
pub struct DigitwinConfig {
    /// Reject agent property updates for names missing from the TD.
    pub strict: bool,
    /// Dirty twin count that triggers an early flush.
    pub flush_threshold: usize,
}

impl Default for DigitwinConfig {
    fn default() -> Self {
        Self {
            strict: false,
            flush_threshold: 100,
        }
    }
}

type TwinRef = Arc<RwLock<ThingTwin>>;

/// In-memory digital twin store with optional write-behind persistence.
pub struct DigitwinStore {
    things: RwLock<BTreeMap<String, TwinRef>>,
    dirty: Mutex<HashSet<String>>,
    removed: Mutex<HashSet<String>>,
    backend: Option<SharedKvStore>,
    pub(crate) flush_needed: Notify,
    config: DigitwinConfig,
}

impl DigitwinStore {
    /// A store without persistence.
    pub fn in_memory(config: DigitwinConfig) -> Self {
        Self {
            things: RwLock::new(BTreeMap::new()),
            dirty: Mutex::new(HashSet::new()),
            removed: Mutex::new(HashSet::new()),
            backend: None,
            flush_needed: Notify::new(),
            config,
        }
    }

    /// Open a store over `backend`, rebuilding the directory by replaying it.
    ///
    /// Records that fail to decode are logged and skipped; the agent
    /// republishes its TD on the next connect.
    pub fn open(backend: SharedKvStore, config: DigitwinConfig) -> Result<Self, DigitwinError> {
        let mut things = BTreeMap::new();
        let mut skipped = 0usize;
        {
            let store = backend.lock();
            let mut cursor = store.cursor(TWIN_KEY_PREFIX.as_bytes())?;
            loop {
                let batch = cursor.next_n(REPLAY_BATCH);
                if batch.is_empty() {
                    break;
                }
                for (key, value) in batch {
                    match serde_json::from_slice::<ThingTwin>(&value) {
                        Ok(twin) => {
                            let id = dthing_id(&twin.agent_id, &twin.td.id);
                            things.insert(id, Arc::new(RwLock::new(twin)));
                        }
                        Err(e) => {
                            skipped += 1;
                            tracing::warn!(
                                key = %String::from_utf8_lossy(&key),
                                error = %e,
                                "skipping undecodable digital twin record"
                            );
                        }
                    }
                }
            }
        }
        tracing::info!(things = things.len(), skipped, "digitwin store loaded");

        Ok(Self {
            things: RwLock::new(things),
            dirty: Mutex::new(HashSet::new()),
            removed: Mutex::new(HashSet::new()),
            backend: Some(backend),
            flush_needed: Notify::new(),
            config,
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_some()
    }

    /// Number of digital twins in the directory.
    pub fn len(&self) -> usize {
        self.things.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.read().is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().len() + self.removed.lock().len()
    }

    fn twin(&self, dthing_id: &str) -> Result<TwinRef, DigitwinError> {
        self.things
            .read()
            .get(dthing_id)
            .cloned()
            .ok_or_else(|| DigitwinError::ThingNotFound(dthing_id.to_string()))
    }

    fn mark_dirty(&self, dthing_id: &str) {
        if self.backend.is_none() {
            return;
        }
        self.removed.lock().remove(dthing_id);
        let count = {
            let mut dirty = self.dirty.lock();
            dirty.insert(dthing_id.to_string());
            dirty.len()
        };
        if count >= self.config.flush_threshold {
            self.flush_needed.notify_one();
        }
    }

    fn mark_removed(&self, dthing_id: &str) {
        if self.backend.is_none() {
            return;
        }
        self.dirty.lock().remove(dthing_id);
        self.removed.lock().insert(dthing_id.to_string());
    }

    // -------------------------------------------------------------------------
    // Directory
    // -------------------------------------------------------------------------

    /// Publish or replace the TD of a Thing owned by `agent_id`.
    ///
    /// Returns the dThingID. A TD under an id owned by a different agent is
    /// rejected with [`DigitwinError::Conflict`] and changes nothing.
    pub fn upsert_td(
        &self,
        agent_id: &str,
        td: ThingDescription,
    ) -> Result<(String, UpsertOutcome), DigitwinError> {
        td.validate()?;
        let id = dthing_id(agent_id, &td.id);

        let outcome = {
            let mut things = self.things.write();
            match things.get(&id) {
                Some(existing) => {
                    let mut twin = existing.write();
                    if !twin.is_owned_by(agent_id) {
                        return Err(DigitwinError::Conflict {
                            thing_id: id,
                            owner: twin.agent_id.clone(),
                        });
                    }
                    twin.replace_td(td);
                    UpsertOutcome::Updated
                }
                None => {
                    things.insert(id.clone(), Arc::new(RwLock::new(ThingTwin::new(agent_id, td))));
                    UpsertOutcome::Created
                }
            }
        };
        self.mark_dirty(&id);
        tracing::debug!(dthing_id = %id, agent_id, ?outcome, "TD upserted");
        Ok((id, outcome))
    }

    /// Delete a twin with its TD and every latest value.
    pub fn remove_td(&self, agent_id: &str, dthing_id: &str) -> Result<(), DigitwinError> {
        {
            let mut things = self.things.write();
            let owner = things
                .get(dthing_id)
                .map(|t| t.read().agent_id.clone())
                .ok_or_else(|| DigitwinError::ThingNotFound(dthing_id.to_string()))?;
            if owner != agent_id {
                return Err(DigitwinError::NotOwner {
                    thing_id: dthing_id.to_string(),
                    agent_id: agent_id.to_string(),
                });
            }
            things.remove(dthing_id);
        }
        self.mark_removed(dthing_id);
        tracing::debug!(dthing_id, agent_id, "TD removed");
        Ok(())
    }

    pub fn read_td(&self, dthing_id: &str) -> Result<ThingDescription, DigitwinError> {
        Ok(self.twin(dthing_id)?.read().td.clone())
    }

    /// TDs in dThingID order, skipping `offset` and returning at most `limit`.
    pub fn read_all_tds(&self, offset: usize, limit: usize) -> Vec<ThingDescription> {
        let twins: Vec<TwinRef> = self
            .things
            .read()
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        twins.iter().map(|t| t.read().td.clone()).collect()
    }

    /// The agent owning a twin.
    pub fn owner_of(&self, dthing_id: &str) -> Result<String, DigitwinError> {
        Ok(self.twin(dthing_id)?.read().agent_id.clone())
    }

    /// The property affordance, if both the twin and the property exist.
    pub fn property_affordance(
        &self,
        dthing_id: &str,
        name: &str,
    ) -> Result<PropertyAffordance, DigitwinError> {
        self.twin(dthing_id)?
            .read()
            .td
            .properties
            .get(name)
            .cloned()
            .ok_or_else(|| DigitwinError::affordance(dthing_id, name))
    }

    /// The action affordance, if both the twin and the action exist.
    pub fn action_affordance(
        &self,
        dthing_id: &str,
        name: &str,
    ) -> Result<ActionAffordance, DigitwinError> {
        self.twin(dthing_id)?
            .read()
            .td
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| DigitwinError::affordance(dthing_id, name))
    }

    // -------------------------------------------------------------------------
    // Latest values
    // -------------------------------------------------------------------------

    fn owned_twin(&self, dthing_id: &str, agent_id: &str) -> Result<TwinRef, DigitwinError> {
        let twin = self.twin(dthing_id)?;
        if !twin.read().is_owned_by(agent_id) {
            return Err(DigitwinError::NotOwner {
                thing_id: dthing_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        Ok(twin)
    }

    /// Store the latest value of a property reported by its agent.
    ///
    /// The sender must own the twin. Older timestamps are dropped.
    pub fn update_property(
        &self,
        dthing_id: &str,
        name: &str,
        value: AffordanceValue,
    ) -> Result<WriteOutcome, DigitwinError> {
        validate_name(name)?;
        let twin = self.owned_twin(dthing_id, &value.sender_id)?;
        let outcome = {
            let mut twin = twin.write();
            if self.config.strict && !twin.td.properties.contains_key(name) {
                return Err(DigitwinError::affordance(dthing_id, name));
            }
            write_monotone(&mut twin.properties, name, value)
        };
        if outcome.is_applied() {
            self.mark_dirty(dthing_id);
        }
        Ok(outcome)
    }

    /// Store several property values of one twin together.
    ///
    /// Every name is checked before any value is written, so a rejected
    /// batch leaves the twin unchanged. Each value keeps its own outcome.
    pub fn update_properties(
        &self,
        dthing_id: &str,
        sender_id: &str,
        values: Vec<(String, AffordanceValue)>,
    ) -> Result<Vec<(String, WriteOutcome)>, DigitwinError> {
        for (name, _) in &values {
            validate_name(name)?;
        }
        let twin = self.owned_twin(dthing_id, sender_id)?;
        let outcomes: Vec<(String, WriteOutcome)> = {
            let mut twin = twin.write();
            if self.config.strict {
                if let Some((name, _)) = values
                    .iter()
                    .find(|(name, _)| !twin.td.properties.contains_key(name))
                {
                    return Err(DigitwinError::affordance(dthing_id, name));
                }
            }
            values
                .into_iter()
                .map(|(name, value)| {
                    let outcome = write_monotone(&mut twin.properties, &name, value);
                    (name, outcome)
                })
                .collect()
        };
        if outcomes.iter().any(|(_, o)| o.is_applied()) {
            self.mark_dirty(dthing_id);
        }
        Ok(outcomes)
    }

    /// Store the latest value of an event. Names outside the TD are accepted.
    pub fn update_event(
        &self,
        dthing_id: &str,
        name: &str,
        value: AffordanceValue,
    ) -> Result<WriteOutcome, DigitwinError> {
        validate_name(name)?;
        let twin = self.owned_twin(dthing_id, &value.sender_id)?;
        let outcome = write_monotone(&mut twin.write().events, name, value);
        if outcome.is_applied() {
            self.mark_dirty(dthing_id);
        }
        Ok(outcome)
    }

    /// Record the latest status of an action.
    ///
    /// Statuses of safe actions are not kept, since they do not change the
    /// Thing's state. Unknown actions are rejected. A newer request replaces
    /// the stored one by timestamp; updates of the stored request only move
    /// its progress forward.
    pub fn update_action_status(
        &self,
        dthing_id: &str,
        status: ActionStatus,
    ) -> Result<WriteOutcome, DigitwinError> {
        let twin = self.twin(dthing_id)?;
        let outcome = {
            let mut twin = twin.write();
            let affordance = twin
                .td
                .actions
                .get(&status.name)
                .ok_or_else(|| DigitwinError::affordance(dthing_id, &status.name))?;
            if affordance.safe {
                return Ok(WriteOutcome::Stale);
            }
            let stale = match twin.actions.get(&status.name) {
                // Updates of one request follow its progress, not the clock.
                Some(stored) if stored.request_id == status.request_id => {
                    !stored.progress_state.can_advance_to(status.progress_state)
                }
                Some(stored) => status.timestamp < stored.timestamp,
                None => false,
            };
            if stale {
                WriteOutcome::Stale
            } else {
                twin.actions.insert(status.name.clone(), status);
                WriteOutcome::Applied
            }
        };
        if outcome.is_applied() {
            self.mark_dirty(dthing_id);
        }
        Ok(outcome)
    }

    pub fn read_property(&self, dthing_id: &str, name: &str) -> Result<AffordanceValue, DigitwinError> {
        let twin = self.twin(dthing_id)?;
        let twin = twin.read();
        twin.properties
            .get(name)
            .cloned()
            .ok_or_else(|| missing(&twin.td.properties, dthing_id, name))
    }

    pub fn read_all_properties(
        &self,
        dthing_id: &str,
    ) -> Result<BTreeMap<String, AffordanceValue>, DigitwinError> {
        Ok(self.twin(dthing_id)?.read().properties.clone())
    }

    pub fn read_event(&self, dthing_id: &str, name: &str) -> Result<AffordanceValue, DigitwinError> {
        let twin = self.twin(dthing_id)?;
        let twin = twin.read();
        twin.events
            .get(name)
            .cloned()
            .ok_or_else(|| missing(&twin.td.events, dthing_id, name))
    }

    pub fn read_all_events(
        &self,
        dthing_id: &str,
    ) -> Result<BTreeMap<String, AffordanceValue>, DigitwinError> {
        Ok(self.twin(dthing_id)?.read().events.clone())
    }

    pub fn query_action(&self, dthing_id: &str, name: &str) -> Result<ActionStatus, DigitwinError> {
        let twin = self.twin(dthing_id)?;
        let twin = twin.read();
        twin.actions
            .get(name)
            .cloned()
            .ok_or_else(|| missing(&twin.td.actions, dthing_id, name))
    }

    pub fn query_all_actions(
        &self,
        dthing_id: &str,
    ) -> Result<BTreeMap<String, ActionStatus>, DigitwinError> {
        Ok(self.twin(dthing_id)?.read().actions.clone())
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Write every dirty twin and every removal to the backend in one batch.
    ///
    /// Returns the number of records written or deleted. On failure the
    /// pending changes are kept for the next attempt.
    pub fn save_changes(&self) -> Result<usize, DigitwinError> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };
        let dirty: Vec<String> = self.dirty.lock().drain().collect();
        let removed: Vec<String> = self.removed.lock().drain().collect();
        if dirty.is_empty() && removed.is_empty() {
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(dirty.len() + removed.len());
        for id in &dirty {
            // Removed since it was marked; the removal set covers it.
            let Some(twin) = self.things.read().get(id).cloned() else {
                continue;
            };
            let encoded = serde_json::to_vec(&*twin.read()).map_err(|e| DigitwinError::Encode {
                thing_id: id.clone(),
                message: e.to_string(),
            });
            match encoded {
                Ok(bytes) => ops.push(BatchOperation::put(twin_key(id), bytes)),
                Err(e) => tracing::error!(dthing_id = %id, error = %e, "skipping twin"),
            }
        }
        ops.extend(removed.iter().map(|id| BatchOperation::delete(twin_key(id))));
        let count = ops.len();

        if let Err(e) = backend.lock().atomic_batch_write(ops) {
            self.dirty.lock().extend(dirty);
            self.removed.lock().extend(removed);
            return Err(e.into());
        }
        tracing::debug!(count, "digitwin changes saved");
        Ok(count)
    }
}

/// Replace `map[name]` unless the stored value is newer than `value`.
fn write_monotone(
    map: &mut BTreeMap<String, AffordanceValue>,
    name: &str,
    value: AffordanceValue,
) -> WriteOutcome {
    match map.get_mut(name) {
        Some(stored) if !stored.is_superseded_by(&value.timestamp) => WriteOutcome::Stale,
        Some(stored) => {
            *stored = value;
            WriteOutcome::Applied
        }
        None => {
            map.insert(name.to_string(), value);
            WriteOutcome::Applied
        }
    }
}

/// `NoValue` for a known affordance, `AffordanceNotFound` otherwise.
fn missing<T>(affordances: &BTreeMap<String, T>, dthing_id: &str, name: &str) -> DigitwinError {
    if affordances.contains_key(name) {
        DigitwinError::no_value(dthing_id, name)
    } else {
        DigitwinError::affordance(dthing_id, name)
    }
}
