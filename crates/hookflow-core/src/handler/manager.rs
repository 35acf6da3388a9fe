use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use hookflow_contracts::{HandlerInfo, HandlerInvokeType, HandlerOption, InvocationError};
use hookflow_traits::CronEngine;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::entry::{HandlerEntry, HandlerKind, Strategy};
use super::invocation::{HandlerInvoke, InvocationOutcome, PendingInvocation};
use super::scheduled::ScheduledTrigger;
use crate::error::{HandlerError, Result};

/// Capacity of each per-session dispatch queue.
pub const DISPATCH_QUEUE_CAPACITY: usize = 1024;

struct DispatchQueue {
    tx: mpsc::Sender<PendingInvocation>,
    rx: tokio::sync::Mutex<mpsc::Receiver<PendingInvocation>>,
}

impl DispatchQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(DISPATCH_QUEUE_CAPACITY);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

pub(crate) struct ManagerInner {
    /// Registration order is preserved for listings.
    handlers: Mutex<Vec<Arc<HandlerEntry>>>,
    queues: Mutex<HashMap<String, Arc<DispatchQueue>>>,
    cron: Arc<dyn CronEngine>,
    shutdown: CancellationToken,
}

/// Non-owning manager reference held by timers and cron callbacks.
#[derive(Clone)]
pub(crate) struct WeakManager(Weak<ManagerInner>);

impl WeakManager {
    pub(crate) fn upgrade(&self) -> Option<HandlerManager> {
        self.0.upgrade().map(|inner| HandlerManager { inner })
    }
}

/// Registry of handler entries plus one dispatch queue per session.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct HandlerManager {
    inner: Arc<ManagerInner>,
}

impl HandlerManager {
    pub fn new(cron: Arc<dyn CronEngine>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                handlers: Mutex::new(Vec::new()),
                queues: Mutex::new(HashMap::new()),
                cron,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a handler, returning its id. Registering the same
    /// (dispatch_id, name) pair again returns the existing id.
    pub fn register_handler(
        &self,
        dispatch_id: &str,
        name: &str,
        timeout: Duration,
        options: Vec<HandlerOption>,
    ) -> Result<String> {
        if self.inner.shutdown.is_cancelled() {
            return Err(HandlerError::ManagerClosed);
        }

        let mut handlers = self.inner.handlers.lock();
        if let Some(existing) = handlers
            .iter()
            .find(|entry| entry.dispatch_id() == dispatch_id && entry.name() == name)
        {
            debug!(handler = %name, dispatch_id = %dispatch_id, "Handler already registered");
            return Ok(existing.id().to_string());
        }

        let strategy = match HandlerKind::from_options(&options) {
            Some(HandlerKind::Scheduled) => Strategy::Scheduled(ScheduledTrigger::new(
                self.inner.cron.clone(),
                self.downgrade(),
            )),
            Some(HandlerKind::Webhook) => HandlerEntry::webhook_strategy(name, &options)?,
            Some(HandlerKind::Invoke) => Strategy::Invoke,
            None => {
                error!(handler = %name, "Handler type not supported");
                return Err(HandlerError::UnsupportedHandlerType(name.to_string()));
            }
        };

        let entry = Arc::new(HandlerEntry::new(dispatch_id, name, timeout, options, strategy));
        let id = entry.id().to_string();
        info!(
            handler = %name,
            handler_id = %id,
            dispatch_id = %dispatch_id,
            kind = ?entry.kind(),
            "Registered handler"
        );
        handlers.push(entry);
        Ok(id)
    }

    /// Close and remove a handler. Unknown ids are ignored.
    pub async fn unregister_handler(&self, id: &str) {
        let removed = {
            let mut handlers = self.inner.handlers.lock();
            handlers
                .iter()
                .position(|entry| entry.id() == id)
                .map(|index| handlers.remove(index))
        };
        if let Some(entry) = removed {
            entry.close().await;
            info!(handler = %entry.name(), handler_id = %id, "Unregistered handler");
        }
    }

    /// Close and remove every handler of a session.
    pub async fn clear_handlers(&self, dispatch_id: &str) {
        let removed = {
            let mut handlers = self.inner.handlers.lock();
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *handlers)
                .into_iter()
                .partition(|entry| entry.dispatch_id() == dispatch_id);
            *handlers = kept;
            removed
        };
        for entry in removed {
            entry.close().await;
        }
    }

    /// Start every handler of a session. Stops at the first failure.
    pub async fn start(&self, dispatch_id: &str) -> Result<()> {
        for entry in self.session_entries(dispatch_id) {
            entry.start().await?;
        }
        Ok(())
    }

    /// Close every handler of a session; they stay registered.
    pub async fn stop(&self, dispatch_id: &str) {
        for entry in self.session_entries(dispatch_id) {
            entry.close().await;
        }
    }

    /// Queue an invocation for its session.
    pub async fn trigger(&self, invoke: HandlerInvoke) -> Result<()> {
        let Some(entry) = self.get(&invoke.handler_id) else {
            error!(handler = %invoke.name, "Handler not found");
            return Err(HandlerError::NotFound(invoke.name.clone()));
        };
        if !entry.is_active() {
            warn!(handler = %entry.name(), "Handler is not active");
            return Err(HandlerError::NotActive(entry.name().to_string()));
        }

        info!(
            handler_id = %entry.id(),
            handler = %entry.name(),
            reason = %invoke.reason,
            "Triggering handler"
        );
        entry.on_trigger(invoke.reason);
        self.watch_invocation(&invoke);

        let queue = self.queue(entry.dispatch_id());
        let pending = invoke.into_pending(entry.dispatch_id());
        tokio::select! {
            sent = queue.tx.send(pending) => sent.map_err(|_| HandlerError::ManagerClosed),
            _ = self.inner.shutdown.cancelled() => Err(HandlerError::ManagerClosed),
        }
    }

    /// Take the next queued invocation of a session. Returns `None` when
    /// `wait` elapses first, or when `cancel` or the manager shuts down.
    pub async fn dequeue(
        &self,
        cancel: &CancellationToken,
        dispatch_id: &str,
        wait: Duration,
    ) -> Option<PendingInvocation> {
        let queue = self.queue(dispatch_id);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = self.inner.shutdown.cancelled() => None,
            item = async { queue.rx.lock().await.recv().await } => item,
            _ = tokio::time::sleep(wait) => None,
        }
    }

    /// Resolve a handler by tag, fire it with reason INVOKE and wait for the
    /// worker's result.
    pub async fn trigger_invoke(&self, tag: &str, body: &str) -> Result<InvocationOutcome> {
        let entry = self
            .get_by_tag(tag)
            .ok_or_else(|| HandlerError::NotFound(tag.to_string()))?;

        let args = HashMap::from([("body".to_string(), body.to_string())]);
        let invoke = entry.invoke(HandlerInvokeType::Invoke, args);
        let handle = invoke.handle().clone();
        self.trigger(invoke).await?;
        Ok(handle.wait().await)
    }

    pub fn list_handlers(&self) -> Vec<Arc<HandlerEntry>> {
        self.inner.handlers.lock().clone()
    }

    pub fn handler_infos(&self) -> Vec<HandlerInfo> {
        self.list_handlers().iter().map(|entry| entry.info()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<HandlerEntry>> {
        self.inner
            .handlers
            .lock()
            .iter()
            .find(|entry| entry.id() == id)
            .cloned()
    }

    pub fn get_by_tag(&self, tag: &str) -> Option<Arc<HandlerEntry>> {
        self.inner
            .handlers
            .lock()
            .iter()
            .find(|entry| entry.tag() == tag)
            .cloned()
    }

    /// True when every registered entry is finished.
    pub fn is_finished(&self) -> bool {
        self.inner
            .handlers
            .lock()
            .iter()
            .all(|entry| entry.is_finished())
    }

    /// True when every entry of one session is finished.
    pub fn is_session_finished(&self, dispatch_id: &str) -> bool {
        self.inner
            .handlers
            .lock()
            .iter()
            .filter(|entry| entry.dispatch_id() == dispatch_id)
            .all(|entry| entry.is_finished())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Wake all dequeue waiters, close every entry and refuse further
    /// registrations. Idempotent.
    pub async fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();

        let handlers = std::mem::take(&mut *self.inner.handlers.lock());
        for entry in handlers {
            entry.close().await;
        }
        info!("Handler manager closed");
    }

    pub(crate) fn downgrade(&self) -> WeakManager {
        WeakManager(Arc::downgrade(&self.inner))
    }

    fn session_entries(&self, dispatch_id: &str) -> Vec<Arc<HandlerEntry>> {
        self.inner
            .handlers
            .lock()
            .iter()
            .filter(|entry| entry.dispatch_id() == dispatch_id)
            .cloned()
            .collect()
    }

    fn queue(&self, dispatch_id: &str) -> Arc<DispatchQueue> {
        self.inner
            .queues
            .lock()
            .entry(dispatch_id.to_string())
            .or_insert_with(|| Arc::new(DispatchQueue::new()))
            .clone()
    }

    /// Bound the wait of anyone holding the invocation handle: complete it
    /// with a timeout error if nothing else does first.
    fn watch_invocation(&self, invoke: &HandlerInvoke) {
        let handle = invoke.handle().clone();
        let timeout = invoke.timeout;
        let name = invoke.name.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                outcome = handle.wait() => match outcome {
                    Ok(result) => debug!(handler = %name, result_length = result.len(), "Handler completed"),
                    Err(e) => warn!(handler = %name, error = %e, "Handler error"),
                },
                _ = tokio::time::sleep(timeout) => {
                    handle.complete(Err(InvocationError::timeout(format!(
                        "handler '{}' did not complete within {:?}",
                        name, timeout
                    ))));
                }
                _ = shutdown.cancelled() => {
                    handle.complete(Err(InvocationError::new("cancelled", "handler manager closed")));
                }
            }
        });
    }
}
