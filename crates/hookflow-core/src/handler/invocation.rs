use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hookflow_contracts::{DispatchHandlerInvoke, HandlerInvokeType, InvocationError};
use tokio::sync::watch;

/// Final result of one invocation as seen by whoever triggered it.
pub type InvocationOutcome = Result<String, InvocationError>;

/// Single-assignment completion slot shared by a trigger source and the
/// dispatch path. The first completion wins; later ones are ignored.
#[derive(Debug, Clone)]
pub struct InvocationHandle {
    slot: Arc<watch::Sender<Option<InvocationOutcome>>>,
}

impl Default for InvocationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationHandle {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Returns false if the handle was already completed.
    pub fn complete(&self, outcome: InvocationOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.slot.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = outcome.take();
            true
        })
    }

    pub fn is_completed(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<InvocationOutcome> {
        self.slot.borrow().clone()
    }

    pub async fn wait(&self) -> InvocationOutcome {
        let mut rx = self.slot.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(InvocationError::new("cancelled", "invocation dropped"))),
            Err(_) => Err(InvocationError::new("cancelled", "invocation dropped")),
        }
    }
}

/// A trigger event produced by a timer, cron tick, webhook or direct call.
#[derive(Debug, Clone)]
pub struct HandlerInvoke {
    pub id: String,
    pub handler_id: String,
    pub name: String,
    pub reason: HandlerInvokeType,
    pub args: HashMap<String, String>,
    pub timeout: Duration,
    pub triggered_at: DateTime<Utc>,
    handle: InvocationHandle,
}

impl HandlerInvoke {
    pub fn new(
        handler_id: impl Into<String>,
        name: impl Into<String>,
        reason: HandlerInvokeType,
        args: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            handler_id: handler_id.into(),
            name: name.into(),
            reason,
            args,
            timeout,
            triggered_at: Utc::now(),
            handle: InvocationHandle::new(),
        }
    }

    pub fn handle(&self) -> &InvocationHandle {
        &self.handle
    }

    pub(crate) fn into_pending(self, dispatch_id: &str) -> PendingInvocation {
        PendingInvocation {
            message: DispatchHandlerInvoke {
                invocation_id: self.id,
                dispatch_id: dispatch_id.to_string(),
                handler_id: self.handler_id,
                handler_name: self.name,
                reason: self.reason,
                args: self.args,
                timeout_ms: self.timeout.as_millis() as u64,
            },
            handle: self.handle,
            triggered_at: self.triggered_at,
        }
    }
}

/// A queued invocation waiting for a dispatch session to pick it up.
#[derive(Debug, Clone)]
pub struct PendingInvocation {
    pub message: DispatchHandlerInvoke,
    pub handle: InvocationHandle,
    pub triggered_at: DateTime<Utc>,
}

impl PendingInvocation {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.message.timeout_ms)
    }
}
