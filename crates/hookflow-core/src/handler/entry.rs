use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hookflow_contracts::{HandlerInfo, HandlerInvokeType, HandlerOption};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::invocation::HandlerInvoke;
use super::scheduled::ScheduledTrigger;
use crate::config::DEFAULT_HANDLER_TIMEOUT;
use crate::error::{HandlerError, Result};

/// Which trigger strategy an entry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Scheduled,
    Webhook,
    Invoke,
}

impl HandlerKind {
    /// The first option with a known trigger type decides the strategy.
    pub fn from_options(options: &[HandlerOption]) -> Option<Self> {
        options.iter().find_map(|option| match option.invoke_type {
            HandlerInvokeType::RunNow
            | HandlerInvokeType::CronSchedule
            | HandlerInvokeType::RunInterval => Some(Self::Scheduled),
            HandlerInvokeType::Webhook => Some(Self::Webhook),
            HandlerInvokeType::Invoke => Some(Self::Invoke),
        })
    }
}

pub(crate) enum Strategy {
    Scheduled(ScheduledTrigger),
    Webhook { webhook_id: String },
    Invoke,
}

#[derive(Default)]
struct EntryState {
    active: bool,
    finished: bool,
    last_invoked: Option<DateTime<Utc>>,
    running: Option<Running>,
}

/// Resources owned by a started entry, released on close.
struct Running {
    cancel: CancellationToken,
    cron_jobs: Vec<String>,
}

/// One registered unit of work.
pub struct HandlerEntry {
    id: String,
    dispatch_id: String,
    name: String,
    options: Vec<HandlerOption>,
    timeout: Duration,
    strategy: Strategy,
    state: Mutex<EntryState>,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("dispatch_id", &self.dispatch_id)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("active", &self.is_active())
            .finish()
    }
}

impl HandlerEntry {
    pub(crate) fn new(
        dispatch_id: &str,
        name: &str,
        timeout: Duration,
        options: Vec<HandlerOption>,
        strategy: Strategy,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            dispatch_id: dispatch_id.to_string(),
            name: name.to_string(),
            options,
            timeout: if timeout.is_zero() {
                DEFAULT_HANDLER_TIMEOUT
            } else {
                timeout
            },
            strategy,
            state: Mutex::new(EntryState::default()),
        }
    }

    /// Build the webhook strategy. The single option's value is the webhook id.
    pub(crate) fn webhook_strategy(name: &str, options: &[HandlerOption]) -> Result<Strategy> {
        match options {
            [option] => {
                info!(handler = %name, webhook_id = %option.value, "Creating webhook handler");
                Ok(Strategy::Webhook {
                    webhook_id: option.value.clone(),
                })
            }
            _ => Err(HandlerError::InvalidWebhookOptions {
                name: name.to_string(),
                count: options.len(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dispatch_id(&self) -> &str {
        &self.dispatch_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routing key: the webhook id for webhook entries, the name otherwise.
    pub fn tag(&self) -> &str {
        match &self.strategy {
            Strategy::Webhook { webhook_id } => webhook_id,
            _ => &self.name,
        }
    }

    pub fn kind(&self) -> HandlerKind {
        match &self.strategy {
            Strategy::Scheduled(_) => HandlerKind::Scheduled,
            Strategy::Webhook { .. } => HandlerKind::Webhook,
            Strategy::Invoke => HandlerKind::Invoke,
        }
    }

    pub fn options(&self) -> &[HandlerOption] {
        &self.options
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Only single-shot scheduled entries ever finish.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn last_invoked(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_invoked
    }

    pub fn on_trigger(&self, _reason: HandlerInvokeType) {
        self.state.lock().last_invoked = Some(Utc::now());
    }

    pub fn invoke(&self, reason: HandlerInvokeType, args: HashMap<String, String>) -> HandlerInvoke {
        HandlerInvoke::new(&self.id, &self.name, reason, args, self.timeout)
    }

    pub fn info(&self) -> HandlerInfo {
        let state = self.state.lock();
        HandlerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            dispatch_id: self.dispatch_id.clone(),
            options: self.options.clone(),
            is_active: state.active,
            last_invoked_timestamp: state.last_invoked,
        }
    }

    /// Activate the entry. Scheduled entries register their timers and cron
    /// jobs here and may fire immediately. Calling start on a started entry
    /// is a no-op; a failed start leaves the entry closed.
    pub async fn start(&self) -> Result<()> {
        let cancel = {
            let mut state = self.state.lock();
            if state.running.is_some() {
                return Ok(());
            }
            let cancel = CancellationToken::new();
            state.running = Some(Running {
                cancel: cancel.clone(),
                cron_jobs: Vec::new(),
            });
            state.active = true;
            cancel
        };

        info!(handler = %self.name, dispatch_id = %self.dispatch_id, "Starting handler");

        if let Strategy::Scheduled(trigger) = &self.strategy {
            for option in &self.options {
                if let Err(e) = trigger.apply_option(self, option, &cancel).await {
                    error!(handler = %self.name, error = %e, "Failed to start handler");
                    self.close().await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Deactivate the entry and release its timers and cron jobs. Idempotent.
    pub async fn close(&self) {
        let running = {
            let mut state = self.state.lock();
            state.active = false;
            state.running.take()
        };
        let Some(running) = running else {
            return;
        };

        info!(handler = %self.name, dispatch_id = %self.dispatch_id, "Stopping handler");
        running.cancel.cancel();

        if let Strategy::Scheduled(trigger) = &self.strategy {
            for job_id in running.cron_jobs {
                if let Err(e) = trigger.remove_cron_job(&job_id).await {
                    warn!(handler = %self.name, job_id = %job_id, error = %e, "Failed to remove cron job");
                }
            }
        }
    }

    pub(crate) fn mark_finished(&self) {
        self.state.lock().finished = true;
    }

    /// Retain a cron job for removal on close. Returns false when the entry
    /// was closed in the meantime and the caller must drop the job itself.
    pub(crate) fn retain_cron_job(&self, job_id: String) -> bool {
        match self.state.lock().running.as_mut() {
            Some(running) => {
                running.cron_jobs.push(job_id);
                true
            }
            None => false,
        }
    }
}
