//! End-to-end scenarios, one module per concern.

pub mod actions;
pub mod publishing;
pub mod sessions;
pub mod twins;
