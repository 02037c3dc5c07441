use hub_storage::KvStoreError;
use hub_types::TypeError;
use thiserror::Error;

/// Digitwin errors.
#[derive(Debug, Error)]
pub enum DigitwinError {
    #[error("digital twin '{0}' not found")]
    ThingNotFound(String),

    #[error("'{name}' not found in digital twin '{thing_id}'")]
    AffordanceNotFound { thing_id: String, name: String },

    #[error("no value recorded for '{name}' in digital twin '{thing_id}'")]
    NoValue { thing_id: String, name: String },

    /// A second agent tried to publish a TD under an id it does not own.
    #[error("digital twin '{thing_id}' is owned by another agent")]
    Conflict { thing_id: String, owner: String },

    /// An agent tried to modify a twin owned by someone else.
    #[error("agent '{agent_id}' does not own digital twin '{thing_id}'")]
    NotOwner { thing_id: String, agent_id: String },

    #[error(transparent)]
    Invalid(#[from] TypeError),

    #[error("storage error: {0}")]
    Storage(#[from] KvStoreError),

    #[error("failed to encode digital twin '{thing_id}': {message}")]
    Encode { thing_id: String, message: String },
}

impl DigitwinError {
    pub fn affordance(thing_id: &str, name: &str) -> Self {
        Self::AffordanceNotFound {
            thing_id: thing_id.to_string(),
            name: name.to_string(),
        }
    }

    pub fn no_value(thing_id: &str, name: &str) -> Self {
        Self::NoValue {
            thing_id: thing_id.to_string(),
            name: name.to_string(),
        }
    }
}
