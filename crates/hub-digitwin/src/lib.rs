//! # Hub Digitwin
//!
//! The digital twin directory and latest-value store.
//!
//! Every published TD becomes a digital twin addressed by its dThingID and
//! owned by the publishing agent. Agents update latest property, event and
//! action values; consumers read them without a round trip to the agent.
//!
//! ## Invariants
//!
//! - Ownership of a twin is immutable for its lifetime.
//! - Latest values are monotone in timestamp per `(dThingID, name)`; equal
//!   timestamps are last-writer-wins.
//! - Persistence is write-behind: mutations mark a twin dirty and the
//!   flusher writes dirty twins in one atomic batch.

pub mod errors;
pub mod flusher;
pub mod store;
pub mod twin;

pub use errors::DigitwinError;
pub use flusher::spawn_flusher;
pub use store::{DigitwinConfig, DigitwinStore, TWIN_KEY_PREFIX};
pub use twin::{ThingTwin, UpsertOutcome, WriteOutcome};
