use hookflow_traits::{CronError, StreamError};
use thiserror::Error;

/// Errors raised by the handler registry and its trigger strategies.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler not found: {0}")]
    NotFound(String),

    #[error("Cannot trigger non-started handler: {0}")]
    NotActive(String),

    #[error("Handler type not supported for '{0}'")]
    UnsupportedHandlerType(String),

    #[error("Webhook handler '{name}' requires exactly one option, got {count}")]
    InvalidWebhookOptions { name: String, count: usize },

    #[error("Invalid interval '{0}': expected a duration like '30s' or a number of seconds")]
    InvalidInterval(String),

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error("Handler manager is closed")]
    ManagerClosed,
}

impl HandlerError {
    /// Configuration mistakes the caller must fix before retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedHandlerType(_)
                | Self::InvalidWebhookOptions { .. }
                | Self::InvalidInterval(_)
                | Self::Cron(CronError::InvalidExpression { .. })
        )
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

pub type Result<T, E = HandlerError> = std::result::Result<T, E>;
