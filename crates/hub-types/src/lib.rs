//! # Hub Types Crate
//!
//! Data model shared by the Hub runtime crates.
//!
//! ## Contents
//!
//! - [`thing`]: Thing Description (TD), affordances, data schemas, forms and
//!   the digital twin ID scheme.
//! - [`value`]: latest-value tuples `(value, timestamp, senderID)` and the
//!   agent value body.
//! - [`action`]: action progress states and the action-status envelope.
//! - [`message`]: protocol-neutral push messages plus the WebSocket frame.
//! - [`timestamp`]: serde helpers accepting RFC 3339 strings or epoch millis.
//!
//! ## Design Principles
//!
//! - **Opaque payloads**: affordance values travel as `serde_json::Value`;
//!   nothing in this crate interprets them.
//! - **Wildcard discipline**: [`WILDCARD`] is valid in subscriptions only and
//!   is rejected as a concrete Thing ID or affordance name.

pub mod action;
pub mod errors;
pub mod message;
pub mod thing;
pub mod timestamp;
pub mod value;

pub use action::{ActionStatus, ProgressState};
pub use errors::TypeError;
pub use message::{Operation, PushKind, PushMessage, WsMessage, WsMessageType};
pub use thing::{
    dthing_id, validate_name, validate_thing_id, ActionAffordance, DataSchema, DataType,
    EventAffordance, Form, PropertyAffordance, ThingDescription,
};
pub use value::{AffordanceValue, AgentValue};

/// Wildcard matching any Thing or any affordance name in subscriptions.
pub const WILDCARD: &str = "+";

/// Pseudo event name under which TD updates are pushed to subscribers.
pub const TD_EVENT_NAME: &str = "$td";
