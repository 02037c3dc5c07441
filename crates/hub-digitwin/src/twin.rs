use hub_types::{AffordanceValue, ActionStatus, ThingDescription};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One digital twin: the agent's TD plus the latest known values.
///
/// This is also the persisted record, stored as JSON under `dtw:{dThingID}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingTwin {
    /// Owning agent; immutable for the twin's lifetime.
    pub agent_id: String,
    pub td: ThingDescription,
    #[serde(default)]
    pub properties: BTreeMap<String, AffordanceValue>,
    #[serde(default)]
    pub events: BTreeMap<String, AffordanceValue>,
    /// Latest status per action name.
    #[serde(default)]
    pub actions: BTreeMap<String, ActionStatus>,
}

impl ThingTwin {
    pub fn new(agent_id: impl Into<String>, td: ThingDescription) -> Self {
        Self {
            agent_id: agent_id.into(),
            td,
            properties: BTreeMap::new(),
            events: BTreeMap::new(),
            actions: BTreeMap::new(),
        }
    }

    /// Replace the TD, keeping values of affordances that still exist.
    pub fn replace_td(&mut self, td: ThingDescription) {
        self.properties.retain(|name, _| td.properties.contains_key(name));
        self.actions.retain(|name, _| td.actions.contains_key(name));
        // Events outside the TD are accepted on update, so they are kept too.
        self.td = td;
    }

    pub fn is_owned_by(&self, agent_id: &str) -> bool {
        self.agent_id == agent_id
    }
}

/// Result of a latest-value write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was stored.
    Applied,
    /// The incoming timestamp is older than the stored one; nothing changed.
    Stale,
}

impl WriteOutcome {
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

/// Result of a TD upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}
