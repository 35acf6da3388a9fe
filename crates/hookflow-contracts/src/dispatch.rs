use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerInvokeType;

/// Error code used when the agent gives up waiting for a worker's result.
pub const TIMEOUT_ERROR_CODE: &str = "timeout";

/// Sent by a worker to open (or keep alive) a dispatch session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub dispatch_id: String,
    #[serde(default)]
    pub client_version: String,
}

/// One invocation as it crosses the network boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchHandlerInvoke {
    pub invocation_id: String,
    pub dispatch_id: String,
    pub handler_id: String,
    pub handler_name: String,
    pub reason: HandlerInvokeType,
    #[serde(default)]
    pub args: HashMap<String, String>,
    pub timeout_ms: u64,
}

/// Frames streamed from the agent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchMessage {
    Invoke(DispatchHandlerInvoke),
    /// Terminal frame: every handler of the session is finished and
    /// nothing is in flight.
    WorkCompleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResult {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl InvocationError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TIMEOUT_ERROR_CODE, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.code == TIMEOUT_ERROR_CODE
    }
}

impl std::fmt::Display for InvocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for InvocationError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub level: String,
    pub message: String,
}

/// A worker's outcome for one invocation. Exactly one of `result` and
/// `error` is expected; an absent pair counts as an empty success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInvocationRequest {
    pub handler_invoke: DispatchHandlerInvoke,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_client_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<InvokeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

impl ReportInvocationRequest {
    pub fn outcome(&self) -> Result<String, InvocationError> {
        match (&self.error, &self.result) {
            (Some(err), _) => Err(err.clone()),
            (None, Some(result)) => Ok(result.value.clone()),
            (None, None) => Ok(String::new()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportInvocationResponse {}
