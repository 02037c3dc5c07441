//! Client-facing error kinds and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hub_digitwin::DigitwinError;
use serde::Serialize;
use std::fmt;

/// Error kinds surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    NotFound,
    BadRequest,
    Conflict,
    Timeout,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short reason string, also used as the `error` field of action envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "notFound",
            Self::BadRequest => "badRequest",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hub API error
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    /// Error message
    pub message: String,
    /// Optional additional data
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Missing, invalid or expired token
    pub fn unauthenticated() -> Self {
        Self::new(ErrorKind::Unauthenticated, "unauthenticated")
    }

    /// Valid token, operation not allowed
    pub fn forbidden(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, details)
    }

    /// Unknown Thing or affordance
    pub fn not_found(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, details)
    }

    /// Malformed payload
    pub fn bad_request(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, details)
    }

    /// Ownership conflict
    pub fn conflict(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, details)
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("timeout: {}", operation.into()),
        )
    }

    /// No agent session reachable
    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, details)
    }

    /// Unrecoverable server error.
    ///
    /// The cause is logged with a short id; the client only sees the id.
    pub fn internal(cause: impl fmt::Display) -> Self {
        let error_id = short_error_id();
        tracing::error!(error_id = %error_id, cause = %cause, "internal error");
        Self::new(ErrorKind::Internal, "internal error")
            .with_data(serde_json::json!({ "errorID": error_id }))
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

fn short_error_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        // 401 bodies stay minimal
        if self.kind == ErrorKind::Unauthenticated {
            let mut state = serializer.serialize_struct("ApiError", 1)?;
            state.serialize_field("error", self.kind.as_str())?;
            return state.end();
        }
        let mut state = serializer.serialize_struct("ApiError", 3)?;
        state.serialize_field("error", self.kind.as_str())?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref data) = self.data {
            state.serialize_field("data", data)?;
        }
        state.end()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::bad_request(format!("invalid JSON: {}", e))
    }
}

impl From<hub_types::TypeError> for ApiError {
    fn from(e: hub_types::TypeError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<DigitwinError> for ApiError {
    fn from(e: DigitwinError) -> Self {
        match e {
            DigitwinError::ThingNotFound(_)
            | DigitwinError::AffordanceNotFound { .. }
            | DigitwinError::NoValue { .. } => ApiError::not_found(e.to_string()),
            DigitwinError::Conflict { .. } => ApiError::conflict(e.to_string()),
            DigitwinError::NotOwner { .. } => ApiError::forbidden(e.to_string()),
            DigitwinError::Invalid(_) => ApiError::bad_request(e.to_string()),
            DigitwinError::Storage(_) | DigitwinError::Encode { .. } => ApiError::internal(e),
        }
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Service-level errors (startup and shutdown)
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Config(#[from] super::config::ConfigError),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    #[error("client store error: {0}")]
    ClientStore(String),

    #[error(transparent)]
    Digitwin(#[from] DigitwinError),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
