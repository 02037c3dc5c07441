//! Sessions and push channels.

mod channel;
mod manager;
mod session;

pub use channel::{ChannelKind, Enqueue, PushChannel};
pub use manager::{SessionLimits, SessionListener, SessionManager};
pub use session::{PushReport, Session, SessionOrigin};

use crate::domain::{ApiError, SessionId};
use thiserror::Error;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client id is empty")]
    EmptyClientId,

    #[error("session {0} already exists")]
    Duplicate(SessionId),

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("push message of {size} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("failed to encode push message: {0}")]
    Encode(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::EmptyClientId | SessionError::FrameTooLarge { .. } => {
                ApiError::bad_request(e.to_string())
            }
            SessionError::NotFound(_) => ApiError::unauthenticated(),
            SessionError::Duplicate(_) | SessionError::Encode(_) => ApiError::internal(e),
        }
    }
}
