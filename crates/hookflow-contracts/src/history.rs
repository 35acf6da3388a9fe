use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::{InvocationError, LogEntry};

/// Audit record of one completed (or timed out) invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerExecution {
    pub dispatch_id: String,
    pub handler_name: String,
    pub invocation_id: String,
    pub start_client_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_server_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_server_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHandlerHistoryRequest {
    pub handler_name: String,
    #[serde(default)]
    pub include_logs: bool,
    /// Keep only the newest `tail` records when positive.
    #[serde(default)]
    pub tail: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetHandlerHistoryResponse {
    pub history: Vec<HandlerExecution>,
}
