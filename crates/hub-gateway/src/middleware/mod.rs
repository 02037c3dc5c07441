//! Tower middleware for the hub HTTP surface.

pub mod auth;
pub mod cors;
pub mod tracing;

pub use auth::{extract_token, AuthContext, AuthLayer, AUTH_COOKIE};
pub use cors::create_cors_layer;
pub use tracing::TracingLayer;
