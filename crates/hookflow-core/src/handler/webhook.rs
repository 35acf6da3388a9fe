//! Webhook deliveries: inbound HTTP calls resolved to handlers by webhook id.

use std::collections::HashMap;

use hookflow_contracts::HandlerInvokeType;
use tracing::info;

use super::entry::{HandlerEntry, HandlerKind};
use super::invocation::HandlerInvoke;
use super::manager::HandlerManager;
use crate::error::{HandlerError, Result};

/// An inbound webhook call as seen by the engine.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub content_type: String,
    pub body: String,
}

impl HandlerEntry {
    pub fn webhook_invoke(&self, request: WebhookRequest) -> HandlerInvoke {
        let args = HashMap::from([
            ("body".to_string(), request.body),
            ("content-type".to_string(), request.content_type),
            ("url".to_string(), request.url),
        ]);
        self.invoke(HandlerInvokeType::Webhook, args)
    }
}

impl HandlerManager {
    /// Queue the webhook handler registered under `webhook_id`. Does not
    /// wait for the worker.
    pub async fn trigger_webhook(&self, webhook_id: &str, request: WebhookRequest) -> Result<()> {
        let entry = self
            .list_handlers()
            .into_iter()
            .find(|entry| entry.kind() == HandlerKind::Webhook && entry.tag() == webhook_id)
            .ok_or_else(|| HandlerError::NotFound(webhook_id.to_string()))?;

        info!(webhook_id = %webhook_id, handler = %entry.name(), "Webhook received");
        self.trigger(entry.webhook_invoke(request)).await
    }
}
