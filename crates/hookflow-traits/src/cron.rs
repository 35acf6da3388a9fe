//! Cron scheduling abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

/// Callback fired on every cron tick.
pub type CronCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
    #[error("Cron engine is shut down")]
    Shutdown,
    #[error("Cron engine error: {0}")]
    Engine(String),
}

#[async_trait]
pub trait CronEngine: Send + Sync {
    /// Register `callback` on `expression` and return the job id.
    async fn add(&self, expression: &str, callback: CronCallback) -> Result<String, CronError>;

    /// Deregister a job. Returns false when the id is unknown.
    async fn remove(&self, id: &str) -> Result<bool, CronError>;
}
