//! Action progress and the action-status envelope.

use crate::errors::TypeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Progress of an action request.
///
/// ```text
///  pending ─► delivered ─► running ─► completed
///        │                       └──► failed
///        └─► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressState {
    Pending,
    Delivered,
    Running,
    Completed,
    Failed,
}

impl ProgressState {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Delivered => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a request in state `self` may move to `next`.
    ///
    /// Only forward moves are allowed; a terminal state is final. Repeating
    /// a non-terminal state is accepted so agents can re-send progress.
    pub fn can_advance_to(self, next: ProgressState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TypeError::UnknownProgressState(other.to_string())),
        }
    }
}

/// Action-status envelope.
///
/// Returned for asynchronous and failed invocations, pushed as
/// `actionStatus`, and posted by agents to report progress. Agents may
/// omit `thingID` and `name`, the Hub fills them in from its own record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStatus {
    #[serde(rename = "requestID")]
    pub request_id: String,
    #[serde(rename = "thingID", default)]
    pub thing_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "progressState")]
    pub progress_state: ProgressState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "crate::timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ActionStatus {
    pub fn new(
        request_id: impl Into<String>,
        thing_id: impl Into<String>,
        name: impl Into<String>,
        progress_state: ProgressState,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            thing_id: thing_id.into(),
            name: name.into(),
            progress_state,
            input: None,
            output: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Mark the status failed with a short reason.
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.progress_state = ProgressState::Failed;
        self.error = Some(reason.into());
        self
    }
}
