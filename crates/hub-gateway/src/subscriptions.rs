//! Event subscriptions and property observations.
//!
//! Two independent tables with the same shape:
//! `dThingID | + -> name | + -> {sessionID}`, plus a reverse index per
//! session so session teardown does not scan the table.

use crate::domain::{ApiError, SessionId};
use crate::sessions::SessionListener;
use hub_types::{validate_name, validate_thing_id, TypeError, WILDCARD};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Which table an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// `subscribe` / `unsubscribe`, matched against events
    Events,
    /// `observe` / `unobserve`, matched against property updates
    Properties,
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Invalid(#[from] TypeError),
}

impl From<SubscribeError> for ApiError {
    fn from(e: SubscribeError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

type Key = (String, String);

#[derive(Debug, Default)]
struct Table {
    by_thing: HashMap<String, HashMap<String, HashSet<SessionId>>>,
    by_session: HashMap<SessionId, HashSet<Key>>,
}

impl Table {
    fn insert(&mut self, session_id: SessionId, thing_id: &str, name: &str) -> bool {
        let added = self
            .by_thing
            .entry(thing_id.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(session_id);
        if added {
            self.by_session
                .entry(session_id)
                .or_default()
                .insert((thing_id.to_string(), name.to_string()));
        }
        added
    }

    fn remove(&mut self, session_id: &SessionId, thing_id: &str, name: &str) -> bool {
        let removed = self.remove_forward(session_id, thing_id, name);
        if let Some(keys) = self.by_session.get_mut(session_id) {
            keys.remove(&(thing_id.to_string(), name.to_string()));
            if keys.is_empty() {
                self.by_session.remove(session_id);
            }
        }
        removed
    }

    /// Remove from the forward table only, pruning empty parents.
    fn remove_forward(&mut self, session_id: &SessionId, thing_id: &str, name: &str) -> bool {
        let Some(names) = self.by_thing.get_mut(thing_id) else {
            return false;
        };
        let Some(sessions) = names.get_mut(name) else {
            return false;
        };
        let removed = sessions.remove(session_id);
        if sessions.is_empty() {
            names.remove(name);
        }
        if names.is_empty() {
            self.by_thing.remove(thing_id);
        }
        removed
    }

    fn remove_session(&mut self, session_id: &SessionId) -> usize {
        let Some(keys) = self.by_session.remove(session_id) else {
            return 0;
        };
        for (thing_id, name) in &keys {
            self.remove_forward(session_id, thing_id, name);
        }
        keys.len()
    }

    fn remove_thing(&mut self, thing_id: &str) -> usize {
        let Some(names) = self.by_thing.remove(thing_id) else {
            return 0;
        };
        let mut count = 0;
        for (name, sessions) in names {
            let key = (thing_id.to_string(), name);
            for session_id in sessions {
                count += 1;
                if let Some(keys) = self.by_session.get_mut(&session_id) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        self.by_session.remove(&session_id);
                    }
                }
            }
        }
        count
    }

    /// Merge the exact/exact, exact/wild, wild/exact and wild/wild buckets.
    fn matching(&self, thing_id: &str, name: &str) -> HashSet<SessionId> {
        let mut out = HashSet::new();
        for thing_key in [thing_id, WILDCARD] {
            let Some(names) = self.by_thing.get(thing_key) else {
                continue;
            };
            for name_key in [name, WILDCARD] {
                if let Some(sessions) = names.get(name_key) {
                    out.extend(sessions.iter().copied());
                }
            }
        }
        out
    }

    fn entries(&self, session_id: &SessionId) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .by_session
            .get(session_id)
            .map(|k| k.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn len(&self) -> usize {
        self.by_session.values().map(HashSet::len).sum()
    }
}

fn validate(thing_id: &str, name: &str) -> Result<(), SubscribeError> {
    if thing_id != WILDCARD {
        validate_thing_id(thing_id)?;
    }
    if name != WILDCARD {
        validate_name(name)?;
    }
    Ok(())
}

/// Registry of `(sessionID, dThingID, name)` entries.
///
/// Entries may name Things that do not exist yet; they match as soon as
/// the Thing publishes.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    events: RwLock<Table>,
    properties: RwLock<Table>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, ns: Namespace) -> &RwLock<Table> {
        match ns {
            Namespace::Events => &self.events,
            Namespace::Properties => &self.properties,
        }
    }

    /// Add an entry. Returns false if it already existed.
    pub fn add(
        &self,
        ns: Namespace,
        session_id: SessionId,
        thing_id: &str,
        name: &str,
    ) -> Result<bool, SubscribeError> {
        validate(thing_id, name)?;
        let added = self.table(ns).write().insert(session_id, thing_id, name);
        if added {
            tracing::debug!(session_id = %session_id, dthing_id = thing_id, name, ns = ?ns, "entry added");
        }
        Ok(added)
    }

    /// Remove an entry. Returns false if it did not exist.
    pub fn remove(
        &self,
        ns: Namespace,
        session_id: SessionId,
        thing_id: &str,
        name: &str,
    ) -> Result<bool, SubscribeError> {
        validate(thing_id, name)?;
        Ok(self.table(ns).write().remove(&session_id, thing_id, name))
    }

    pub fn subscribe(&self, session_id: SessionId, thing_id: &str, name: &str) -> Result<bool, SubscribeError> {
        self.add(Namespace::Events, session_id, thing_id, name)
    }

    pub fn unsubscribe(&self, session_id: SessionId, thing_id: &str, name: &str) -> Result<bool, SubscribeError> {
        self.remove(Namespace::Events, session_id, thing_id, name)
    }

    pub fn observe(&self, session_id: SessionId, thing_id: &str, name: &str) -> Result<bool, SubscribeError> {
        self.add(Namespace::Properties, session_id, thing_id, name)
    }

    pub fn unobserve(&self, session_id: SessionId, thing_id: &str, name: &str) -> Result<bool, SubscribeError> {
        self.remove(Namespace::Properties, session_id, thing_id, name)
    }

    /// Sessions to receive an event `name` of `thing_id`.
    pub fn subscribers(&self, thing_id: &str, name: &str) -> HashSet<SessionId> {
        self.events.read().matching(thing_id, name)
    }

    /// Sessions to receive a property update `name` of `thing_id`.
    pub fn observers(&self, thing_id: &str, name: &str) -> HashSet<SessionId> {
        self.properties.read().matching(thing_id, name)
    }

    /// Drop every entry of a session, in both namespaces.
    pub fn remove_session(&self, session_id: &SessionId) -> usize {
        self.events.write().remove_session(session_id)
            + self.properties.write().remove_session(session_id)
    }

    /// Drop every entry naming `thing_id` exactly. Wildcard entries stay.
    pub fn remove_thing(&self, thing_id: &str) -> usize {
        let count =
            self.events.write().remove_thing(thing_id) + self.properties.write().remove_thing(thing_id);
        if count > 0 {
            tracing::debug!(dthing_id = thing_id, count, "entries swept for removed thing");
        }
        count
    }

    /// Entries of a session, sorted.
    pub fn entries(&self, ns: Namespace, session_id: &SessionId) -> Vec<(String, String)> {
        self.table(ns).read().entries(session_id)
    }

    pub fn len(&self, ns: Namespace) -> usize {
        self.table(ns).read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len(Namespace::Events) == 0 && self.len(Namespace::Properties) == 0
    }
}

impl SessionListener for SubscriptionRegistry {
    fn on_session_closed(&self, session_id: SessionId, client_id: &str) {
        let removed = self.remove_session(&session_id);
        if removed > 0 {
            tracing::debug!(session_id = %session_id, client_id, removed, "subscriptions dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_and_wildcard_matching() {
        let reg = SubscriptionRegistry::new();
        let (s1, s2, s3, s4) = (SessionId::new(), SessionId::new(), SessionId::new(), SessionId::new());
        reg.subscribe(s1, "T1", "temperature").unwrap();
        reg.subscribe(s2, "T1", "+").unwrap();
        reg.subscribe(s3, "+", "temperature").unwrap();
        reg.subscribe(s4, "+", "+").unwrap();

        let hit = reg.subscribers("T1", "temperature");
        assert_eq!(hit.len(), 4);

        let hit = reg.subscribers("T1", "humidity");
        assert_eq!(hit, HashSet::from([s2, s4]));

        let hit = reg.subscribers("T2", "temperature");
        assert_eq!(hit, HashSet::from([s3, s4]));
    }

    #[test]
    fn test_namespaces_are_separate() {
        let reg = SubscriptionRegistry::new();
        let s = SessionId::new();
        reg.observe(s, "T1", "x").unwrap();
        assert!(reg.subscribers("T1", "x").is_empty());
        assert_eq!(reg.observers("T1", "x"), HashSet::from([s]));
    }

    #[test]
    fn test_idempotent_subscribe_and_unsubscribe() {
        let reg = SubscriptionRegistry::new();
        let s = SessionId::new();
        assert!(reg.subscribe(s, "T1", "e").unwrap());
        assert!(!reg.subscribe(s, "T1", "e").unwrap());
        assert_eq!(reg.len(Namespace::Events), 1);

        assert!(reg.unsubscribe(s, "T1", "e").unwrap());
        assert!(!reg.unsubscribe(s, "T1", "e").unwrap());
        assert!(reg.subscribers("T1", "e").is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_empty_parents_pruned() {
        let reg = SubscriptionRegistry::new();
        let s = SessionId::new();
        reg.subscribe(s, "T1", "e").unwrap();
        reg.unsubscribe(s, "T1", "e").unwrap();
        assert!(reg.events.read().by_thing.is_empty());
        assert!(reg.events.read().by_session.is_empty());
    }

    #[test]
    fn test_remove_session_clears_both_namespaces() {
        let reg = SubscriptionRegistry::new();
        let s = SessionId::new();
        let other = SessionId::new();
        reg.subscribe(s, "T1", "e").unwrap();
        reg.observe(s, "+", "p").unwrap();
        reg.subscribe(other, "T1", "e").unwrap();

        reg.on_session_closed(s, "c1");
        assert_eq!(reg.subscribers("T1", "e"), HashSet::from([other]));
        assert!(reg.observers("T1", "p").is_empty());
    }

    #[test]
    fn test_remove_thing_keeps_wildcards() {
        let reg = SubscriptionRegistry::new();
        let (s1, s2) = (SessionId::new(), SessionId::new());
        reg.subscribe(s1, "T1", "e").unwrap();
        reg.subscribe(s2, "+", "e").unwrap();
        assert_eq!(reg.remove_thing("T1"), 1);
        assert_eq!(reg.subscribers("T1", "e"), HashSet::from([s2]));
        assert!(reg.entries(Namespace::Events, &s1).is_empty());
    }

    #[test]
    fn test_subscribe_before_thing_exists() {
        let reg = SubscriptionRegistry::new();
        let s = SessionId::new();
        reg.subscribe(s, "not-yet", "e").unwrap();
        assert_eq!(reg.subscribers("not-yet", "e"), HashSet::from([s]));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let reg = SubscriptionRegistry::new();
        assert!(reg.subscribe(SessionId::new(), "a/b", "e").is_err());
        assert!(reg.subscribe(SessionId::new(), "", "e").is_err());
    }

    fn pattern() -> impl Strategy<Value = String> {
        prop_oneof![Just("+".to_string()), "[ab]".prop_map(String::from)]
    }

    proptest! {
        #[test]
        fn prop_matching_equals_naive_filter(
            entries in proptest::collection::vec((0usize..4, pattern(), pattern()), 0..20),
            thing in "[ab]",
            name in "[ab]",
        ) {
            let sessions: Vec<SessionId> = (0..4).map(|_| SessionId::new()).collect();
            let reg = SubscriptionRegistry::new();
            for (idx, t, n) in &entries {
                reg.subscribe(sessions[*idx], t, n).unwrap();
            }
            let expected: HashSet<SessionId> = entries
                .iter()
                .filter(|(_, t, n)| (t == &thing || t == "+") && (n == &name || n == "+"))
                .map(|(idx, _, _)| sessions[*idx])
                .collect();
            prop_assert_eq!(reg.subscribers(&thing, &name), expected);
        }
    }
}
