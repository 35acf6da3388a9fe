use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, OriginalUri, Path},
    http::{HeaderMap, Uri, header},
    routing::post,
};
use hookflow_core::HandlerError;
use hookflow_core::handler::WebhookRequest;
use serde_json::{Value, json};
use tracing::warn;

use crate::{ApiError, AppState};

/// The first path segment is the webhook id. Deeper segments are accepted
/// and reach the worker through the `url` arg.
pub fn router() -> Router {
    Router::new()
        .route("/{webhook_id}", post(receive_webhook).put(receive_webhook))
        .route(
            "/{webhook_id}/{*rest}",
            post(receive_webhook_subpath).put(receive_webhook_subpath),
        )
}

async fn receive_webhook(
    Extension(state): Extension<AppState>,
    Path(webhook_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    forward_webhook(state, webhook_id, uri, headers, body).await
}

async fn receive_webhook_subpath(
    Extension(state): Extension<AppState>,
    Path((webhook_id, _rest)): Path<(String, String)>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    forward_webhook(state, webhook_id, uri, headers, body).await
}

async fn forward_webhook(
    state: AppState,
    webhook_id: String,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let request = WebhookRequest {
        url: uri.to_string(),
        content_type,
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    match state.dispatch.manager().trigger_webhook(&webhook_id, request).await {
        Ok(()) => Ok(Json(json!({ "status": "ok", "webhookId": webhook_id }))),
        Err(HandlerError::NotFound(_)) => Err(ApiError::not_found("webhook")),
        Err(e) => {
            warn!(webhook_id = %webhook_id, error = %e, "Webhook trigger failed");
            Err(e.into())
        }
    }
}
