use async_trait::async_trait;
use hookflow_traits::{CronCallback, CronEngine, CronError};
use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

/// [`CronEngine`] backed by tokio-cron-scheduler.
///
/// Accepts standard five-field expressions (minute first) as well as the
/// scheduler's native six-field form (seconds first).
pub struct CronScheduler {
    /// tokio-cron-scheduler instance
    scheduler: JobScheduler,
    /// job_uuid -> normalized expression
    job_map: Arc<RwLock<HashMap<Uuid, String>>>,
    /// Set once `shutdown` has run; later `add` calls are refused
    is_shutdown: AtomicBool,
}

impl CronScheduler {
    /// Create a new cron scheduler. Jobs do not fire until [`Self::start`].
    pub async fn new() -> Result<Self, CronError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| CronError::Engine(format!("Failed to create JobScheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            job_map: Arc::new(RwLock::new(HashMap::new())),
            is_shutdown: AtomicBool::new(false),
        })
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<(), CronError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| CronError::Engine(format!("Failed to start scheduler: {}", e)))?;

        info!("CronScheduler started");
        Ok(())
    }

    /// Shut down the scheduler
    ///
    /// Idempotent. Jobs still registered stop firing.
    pub async fn shutdown(&self) -> Result<(), CronError> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| CronError::Engine(format!("Failed to shutdown scheduler: {}", e)))?;

        info!("CronScheduler shutdown");
        Ok(())
    }

    /// Get the number of active jobs
    pub async fn active_job_count(&self) -> usize {
        self.job_map.read().await.len()
    }
}

#[async_trait]
impl CronEngine for CronScheduler {
    /// Add a scheduled job
    ///
    /// `expression` may be five-field (min hour day month weekday) or
    /// six-field with a leading seconds field. Returns the job uuid used
    /// for removal.
    async fn add(&self, expression: &str, callback: CronCallback) -> Result<String, CronError> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(CronError::Shutdown);
        }

        let normalized = normalize_expression(expression);
        debug!(cron = %normalized, "Adding cron job");

        let job = Job::new_async(normalized.as_str(), move |_uuid, _l| {
            let callback = callback.clone();
            Box::pin(async move {
                callback().await;
            })
        })
        .map_err(|e| CronError::InvalidExpression {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        let job_uuid = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| CronError::Engine(format!("Failed to add job to scheduler: {}", e)))?;

        self.job_map
            .write()
            .await
            .insert(job_uuid, normalized.clone());

        info!(job_uuid = %job_uuid, cron = %normalized, "Cron job added");
        Ok(job_uuid.to_string())
    }

    /// Remove a scheduled job
    ///
    /// Returns Ok(true) when a job was found and removed, Ok(false) when no
    /// job existed or `id` is not a job uuid.
    async fn remove(&self, id: &str) -> Result<bool, CronError> {
        let Ok(job_uuid) = Uuid::parse_str(id) else {
            return Ok(false);
        };

        if self.job_map.write().await.remove(&job_uuid).is_none() {
            debug!(job_uuid = %job_uuid, "No cron job found (might already be removed)");
            return Ok(false);
        }

        self.scheduler
            .remove(&job_uuid)
            .await
            .map_err(|e| CronError::Engine(format!("Failed to remove job from scheduler: {}", e)))?;

        info!(job_uuid = %job_uuid, "Cron job removed");
        Ok(true)
    }
}

/// Prefix a zero seconds field onto five-field expressions.
pub fn normalize_expression(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') || trimmed.split_whitespace().count() != 5 {
        return trimmed.to_string();
    }
    format!("0 {}", trimmed)
}
