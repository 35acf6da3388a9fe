//! Hookflow Core - handler dispatch engine.
//!
//! Remote workers register handlers, open a dispatch session and receive
//! invocations fired by timers, cron schedules, webhooks or direct calls.
//! Results come back through [`dispatch::DispatchService::report_invocation`]
//! and are written to the execution history.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handler;
pub mod history;

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

pub use config::{DEFAULT_HANDLER_TIMEOUT, DispatchConfig, HistoryConfig};
pub use dispatch::DispatchService;
pub use engine::CronScheduler;
pub use error::{DispatchError, HandlerError, HistoryError};
pub use handler::{HandlerEntry, HandlerKind, HandlerManager};
pub use history::HistoryManager;

/// The engine wired together: cron scheduler, handler registry, history
/// and the dispatch service on top.
pub struct AgentCore {
    pub cron: Arc<CronScheduler>,
    pub manager: HandlerManager,
    pub history: Arc<HistoryManager>,
    pub dispatch: DispatchService,
}

impl AgentCore {
    pub async fn new(dispatch: DispatchConfig, history: HistoryConfig) -> Result<Arc<Self>> {
        let cron = Arc::new(
            CronScheduler::new()
                .await
                .context("Failed to create cron scheduler")?,
        );
        cron.start().await.context("Failed to start cron scheduler")?;

        let history = Arc::new(HistoryManager::new(history));
        history
            .start()
            .await
            .with_context(|| format!("Failed to start history manager at {}", history.path().display()))?;

        let manager = HandlerManager::new(cron.clone());
        let dispatch = DispatchService::new(manager.clone(), history.clone(), dispatch);

        info!(history_path = %history.path().display(), "Agent core initialized");
        Ok(Arc::new(Self {
            cron,
            manager,
            history,
            dispatch,
        }))
    }

    pub async fn shutdown(&self) {
        self.manager.close().await;
        self.history.close();
        if let Err(e) = self.cron.shutdown().await {
            error!(error = %e, "Failed to shutdown cron scheduler");
        }
        info!("Agent core shut down");
    }
}
