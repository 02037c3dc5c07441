//! Client authentication.
//!
//! The [`Authenticator`] issues and validates bearer tokens. Session tokens
//! carry the session id they were issued for; agent tokens carry only the
//! client id and survive reconnects.

mod jwt;
mod store;

pub use jwt::JwtAuthenticator;
pub use store::{hash_password, verify_password, AuthnStore, ClientRecord};

use crate::domain::{ApiError, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Client role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Service,
    Agent,
    Operator,
    Viewer,
}

impl Role {
    /// May publish TDs and values for its own Things.
    pub fn can_act_as_agent(self) -> bool {
        matches!(self, Role::Admin | Role::Service | Role::Agent)
    }

    /// May write properties and invoke actions.
    pub fn can_operate(self) -> bool {
        !matches!(self, Role::Viewer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Service => "service",
            Role::Agent => "agent",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid client id or password")]
    InvalidCredentials,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("unknown client '{0}'")]
    UnknownClient(String),

    /// Refresh requested for a token issued to another client
    #[error("token does not belong to client '{0}'")]
    ClientMismatch(String),

    #[error("client '{0}' already exists")]
    DuplicateClient(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("client store error: {0}")]
    Store(String),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken(_)
            | AuthError::Expired
            | AuthError::UnknownClient(_)
            | AuthError::ClientMismatch(_) => {
                tracing::debug!(error = %e, "authentication rejected");
                ApiError::unauthenticated()
            }
            AuthError::DuplicateClient(_) => ApiError::conflict(e.to_string()),
            AuthError::Signing(_) | AuthError::Store(_) => ApiError::internal(e),
        }
    }
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub token: String,
    pub session_id: SessionId,
    pub role: Role,
}

/// Identity recovered from a valid token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub client_id: String,
    /// `None` for agent tokens
    pub session_id: Option<SessionId>,
    pub role: Role,
}

/// Token issuing and validation capability.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify the password and issue a session token for a new session id.
    async fn login(&self, client_id: &str, password: &str) -> Result<LoginGrant, AuthError>;

    /// Decode and verify a token. Session liveness is checked by the caller.
    fn validate_token(&self, token: &str) -> Result<TokenInfo, AuthError>;

    /// Issue a fresh token of the same flavour as `old_token`.
    fn refresh_token(&self, client_id: &str, old_token: &str) -> Result<String, AuthError>;

    /// Issue a long-lived agent token without a session claim.
    fn create_agent_token(&self, client_id: &str) -> Result<String, AuthError>;
}
