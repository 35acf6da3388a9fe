use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hookflow_contracts::DispatchHandlerInvoke;
use parking_lot::Mutex;

use crate::handler::InvocationHandle;

/// An invocation that was sent to a worker and has no result yet.
#[derive(Debug, Clone)]
pub struct InflightRequest {
    pub message: DispatchHandlerInvoke,
    pub handle: InvocationHandle,
    pub sent_at: DateTime<Utc>,
}

/// Invocation id -> in-flight request. Removal is the single point that
/// decides whether a real result or a timeout completes an invocation.
#[derive(Debug, Default)]
pub struct InflightTable {
    requests: Mutex<HashMap<String, InflightRequest>>,
}

impl InflightTable {
    pub fn insert(&self, request: InflightRequest) {
        self.requests
            .lock()
            .insert(request.message.invocation_id.clone(), request);
    }

    pub fn remove(&self, invocation_id: &str) -> Option<InflightRequest> {
        self.requests.lock().remove(invocation_id)
    }

    pub fn get(&self, invocation_id: &str) -> Option<InflightRequest> {
        self.requests.lock().get(invocation_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    pub fn count_for(&self, dispatch_id: &str) -> usize {
        self.requests
            .lock()
            .values()
            .filter(|request| request.message.dispatch_id == dispatch_id)
            .count()
    }
}
