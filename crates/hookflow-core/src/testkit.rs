//! In-memory stand-ins for the transport and cron seams.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hookflow_contracts::{DispatchMessage, DispatchRequest};
use hookflow_traits::{CronCallback, CronEngine, CronError, DispatchStream, StreamError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::normalize_expression;

/// [`DispatchStream`] over unbounded channels.
pub struct ChannelDispatchStream {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<DispatchRequest>>,
    outbound: mpsc::UnboundedSender<DispatchMessage>,
    cancel: CancellationToken,
}

/// The worker's end of a [`ChannelDispatchStream`].
pub struct StreamClient {
    pub requests: mpsc::UnboundedSender<DispatchRequest>,
    pub messages: mpsc::UnboundedReceiver<DispatchMessage>,
    pub cancel: CancellationToken,
}

pub fn channel_stream() -> (Arc<ChannelDispatchStream>, StreamClient) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let stream = Arc::new(ChannelDispatchStream {
        inbound: tokio::sync::Mutex::new(request_rx),
        outbound: message_tx,
        cancel: cancel.clone(),
    });
    let client = StreamClient {
        requests: request_tx,
        messages: message_rx,
        cancel,
    };
    (stream, client)
}

impl StreamClient {
    pub fn open(&self, dispatch_id: &str) {
        let _ = self.requests.send(DispatchRequest {
            dispatch_id: dispatch_id.to_string(),
            client_version: "test".to_string(),
        });
    }

    pub async fn next_message(&mut self, timeout: Duration) -> Option<DispatchMessage> {
        tokio::time::timeout(timeout, self.messages.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl DispatchStream for ChannelDispatchStream {
    async fn send(&self, message: DispatchMessage) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Closed);
        }
        self.outbound.send(message).map_err(|_| StreamError::Closed)
    }

    async fn recv(&self) -> Option<Result<DispatchRequest, StreamError>> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            request = inbound.recv() => request.map(Ok),
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct RecordedJob {
    id: String,
    callback: CronCallback,
}

/// [`CronEngine`] that never fires on its own; tests fire jobs explicitly.
#[derive(Default)]
pub struct RecordingCron {
    jobs: Mutex<Vec<RecordedJob>>,
    expressions: Mutex<Vec<String>>,
}

impl RecordingCron {
    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Every expression ever registered, in order.
    pub fn expressions(&self) -> Vec<String> {
        self.expressions.lock().clone()
    }

    pub async fn fire_all(&self) {
        let callbacks: Vec<_> = self
            .jobs
            .lock()
            .iter()
            .map(|job| job.callback.clone())
            .collect();
        for callback in callbacks {
            callback().await;
        }
    }
}

#[async_trait]
impl CronEngine for RecordingCron {
    async fn add(&self, expression: &str, callback: CronCallback) -> Result<String, CronError> {
        let normalized = normalize_expression(expression);
        if !normalized.starts_with('@') && normalized.split_whitespace().count() != 6 {
            return Err(CronError::InvalidExpression {
                expression: expression.to_string(),
                reason: "expected five or six fields".to_string(),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.expressions.lock().push(expression.to_string());
        self.jobs.lock().push(RecordedJob {
            id: id.clone(),
            callback,
        });
        Ok(id)
    }

    async fn remove(&self, id: &str) -> Result<bool, CronError> {
        let mut jobs = self.jobs.lock();
        match jobs.iter().position(|job| job.id == id) {
            Some(index) => {
                jobs.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
