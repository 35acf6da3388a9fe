//! Clock-driven triggers: RUN_NOW, RUN_INTERVAL and CRON_SCHEDULE.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use hookflow_contracts::{HandlerInvokeType, HandlerOption};
use hookflow_traits::{CronCallback, CronEngine, CronError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::entry::HandlerEntry;
use super::invocation::HandlerInvoke;
use super::manager::WeakManager;
use crate::error::{HandlerError, Result};

pub(crate) struct ScheduledTrigger {
    cron: Arc<dyn CronEngine>,
    manager: WeakManager,
}

/// What a background task needs to mint new invocations without holding
/// on to the entry itself.
#[derive(Clone)]
struct InvokeTarget {
    handler_id: String,
    name: String,
    timeout: Duration,
}

impl InvokeTarget {
    fn of(entry: &HandlerEntry) -> Self {
        Self {
            handler_id: entry.id().to_string(),
            name: entry.name().to_string(),
            timeout: entry.timeout(),
        }
    }

    fn invoke(&self, reason: HandlerInvokeType) -> HandlerInvoke {
        HandlerInvoke::new(
            &self.handler_id,
            &self.name,
            reason,
            HashMap::new(),
            self.timeout,
        )
    }
}

impl ScheduledTrigger {
    pub(crate) fn new(cron: Arc<dyn CronEngine>, manager: WeakManager) -> Self {
        Self { cron, manager }
    }

    pub(crate) async fn apply_option(
        &self,
        entry: &HandlerEntry,
        option: &HandlerOption,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match option.invoke_type {
            HandlerInvokeType::RunNow => {
                info!(handler = %entry.name(), "Running handler due to RUN_NOW");
                fire(
                    &self.manager,
                    entry.invoke(HandlerInvokeType::RunNow, HashMap::new()),
                )
                .await;
                if is_single_trigger(entry.options()) {
                    entry.mark_finished();
                }
            }
            HandlerInvokeType::RunInterval => {
                let interval = parse_interval(&option.value)?;
                info!(handler = %entry.name(), interval = ?interval, "Registering handler with RUN_INTERVAL");

                let manager = self.manager.clone();
                let target = InvokeTarget::of(entry);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = ticker.tick() => {}
                        }
                        let invoke = target.invoke(HandlerInvokeType::RunInterval);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = fire(&manager, invoke) => {}
                        }
                    }
                });
            }
            HandlerInvokeType::CronSchedule => {
                info!(handler = %entry.name(), schedule = %option.value, "Registering handler with CRON_SCHEDULE");

                let manager = self.manager.clone();
                let target = InvokeTarget::of(entry);
                let callback: CronCallback = Arc::new(move || {
                    let manager = manager.clone();
                    let invoke = target.invoke(HandlerInvokeType::CronSchedule);
                    async move { fire(&manager, invoke).await }.boxed()
                });

                let job_id = self.cron.add(&option.value, callback).await?;
                if !entry.retain_cron_job(job_id.clone()) {
                    self.remove_cron_job(&job_id).await?;
                }
            }
            HandlerInvokeType::Webhook | HandlerInvokeType::Invoke => {}
        }

        Ok(())
    }

    pub(crate) async fn remove_cron_job(&self, job_id: &str) -> Result<bool, CronError> {
        self.cron.remove(job_id).await
    }
}

async fn fire(manager: &WeakManager, invoke: HandlerInvoke) {
    let Some(manager) = manager.upgrade() else {
        return;
    };
    let name = invoke.name.clone();
    if let Err(e) = manager.trigger(invoke).await {
        warn!(handler = %name, error = %e, "Scheduled trigger failed");
    }
}

/// True when RUN_NOW is the entry's only trigger.
fn is_single_trigger(options: &[HandlerOption]) -> bool {
    matches!(options, [only] if only.invoke_type == HandlerInvokeType::RunNow)
}

/// Parse an interval as a duration (`"30s"`, `"1h30m"`), falling back to a
/// bare number of seconds. Zero is rejected.
pub fn parse_interval(value: &str) -> Result<Duration> {
    let value = value.trim();
    let interval = humantime::parse_duration(value)
        .ok()
        .or_else(|| value.parse::<u64>().ok().map(Duration::from_secs))
        .ok_or_else(|| HandlerError::InvalidInterval(value.to_string()))?;

    if interval.is_zero() {
        return Err(HandlerError::InvalidInterval(value.to_string()));
    }
    Ok(interval)
}
