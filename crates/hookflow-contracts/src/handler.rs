use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a handler gets fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerInvokeType {
    RunNow,
    CronSchedule,
    RunInterval,
    Webhook,
    Invoke,
}

impl HandlerInvokeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunNow => "RUN_NOW",
            Self::CronSchedule => "CRON_SCHEDULE",
            Self::RunInterval => "RUN_INTERVAL",
            Self::Webhook => "WEBHOOK",
            Self::Invoke => "INVOKE",
        }
    }

    /// Triggers owned by the agent's own clock.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::RunNow | Self::CronSchedule | Self::RunInterval)
    }
}

impl std::fmt::Display for HandlerInvokeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trigger declaration on a handler.
///
/// `value` carries the interval (`"30s"`, `"10"`), the cron expression or
/// the webhook id depending on `invoke_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOption {
    #[serde(rename = "type")]
    pub invoke_type: HandlerInvokeType,
    #[serde(default)]
    pub value: String,
}

impl HandlerOption {
    pub fn new(invoke_type: HandlerInvokeType, value: impl Into<String>) -> Self {
        Self {
            invoke_type,
            value: value.into(),
        }
    }

    pub fn run_now() -> Self {
        Self::new(HandlerInvokeType::RunNow, "")
    }

    pub fn interval(value: impl Into<String>) -> Self {
        Self::new(HandlerInvokeType::RunInterval, value)
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Self::new(HandlerInvokeType::CronSchedule, expression)
    }

    pub fn webhook(id: impl Into<String>) -> Self {
        Self::new(HandlerInvokeType::Webhook, id)
    }

    pub fn invoke() -> Self {
        Self::new(HandlerInvokeType::Invoke, "")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterHandlerRequest {
    pub dispatch_id: String,
    pub handler_name: String,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub options: Vec<HandlerOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterHandlerResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterHandlerRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnregisterHandlerResponse {}

/// Registry snapshot of a single handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerInfo {
    pub id: String,
    pub name: String,
    pub dispatch_id: String,
    pub options: Vec<HandlerOption>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_invoked_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListHandlersResponse {
    pub handlers: Vec<HandlerInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_uses_protocol_type_names() {
        let json = serde_json::to_value(HandlerOption::interval("30s")).unwrap();
        assert_eq!(json["type"], "RUN_INTERVAL");
        assert_eq!(json["value"], "30s");

        let parsed: HandlerOption =
            serde_json::from_str(r#"{"type":"CRON_SCHEDULE","value":"0 * * * *"}"#).unwrap();
        assert_eq!(parsed.invoke_type, HandlerInvokeType::CronSchedule);
    }

    #[test]
    fn register_request_defaults_timeout_and_options() {
        let req: RegisterHandlerRequest =
            serde_json::from_str(r#"{"dispatch_id":"d1","handler_name":"h1"}"#).unwrap();
        assert_eq!(req.timeout_ms, 0);
        assert!(req.options.is_empty());
    }

    #[test]
    fn scheduled_types() {
        assert!(HandlerInvokeType::RunNow.is_scheduled());
        assert!(HandlerInvokeType::CronSchedule.is_scheduled());
        assert!(!HandlerInvokeType::Webhook.is_scheduled());
        assert!(!HandlerInvokeType::Invoke.is_scheduled());
    }
}
