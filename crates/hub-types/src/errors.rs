//! Validation errors for the shared data model.

use thiserror::Error;

/// Errors raised while validating identifiers and message bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// A Thing ID is empty, the wildcard, or contains a reserved character.
    #[error("invalid thing id '{id}': {reason}")]
    InvalidThingId { id: String, reason: &'static str },

    /// An affordance name is empty, the wildcard, or contains a reserved character.
    #[error("invalid affordance name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Unparseable timestamp value.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Unknown progress state string.
    #[error("unknown progress state '{0}'")]
    UnknownProgressState(String),
}
