use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use hookflow_contracts::{GetHandlerHistoryRequest, GetHandlerHistoryResponse, ListHandlersResponse};
use serde_json::{Value, json};

use crate::{ApiError, AppState};

const ADMIN_HISTORY_TAIL: usize = 100;

pub fn router() -> Router {
    Router::new()
        .route("/handlers", get(list_handlers))
        .route("/handlers/{handler}", get(handler_history))
        .route("/handlers/{handler}/invoke", post(invoke_handler))
        .route("/healthcheck", get(healthcheck))
        .route("/info", get(info))
}

async fn list_handlers(Extension(state): Extension<AppState>) -> Json<ListHandlersResponse> {
    Json(state.dispatch.list_handlers())
}

async fn handler_history(
    Extension(state): Extension<AppState>,
    Path(handler): Path<String>,
) -> Result<Json<GetHandlerHistoryResponse>, ApiError> {
    let response = state
        .dispatch
        .get_handler_history(GetHandlerHistoryRequest {
            handler_name: handler,
            include_logs: true,
            tail: ADMIN_HISTORY_TAIL,
        })
        .await?;
    Ok(Json(response))
}

/// Fire a handler by tag and wait for the worker's result.
async fn invoke_handler(
    Extension(state): Extension<AppState>,
    Path(handler): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = String::from_utf8_lossy(&body);
    let outcome = state.dispatch.manager().trigger_invoke(&handler, &body).await?;

    match outcome {
        Ok(result) if result.is_empty() => Ok(StatusCode::OK.into_response()),
        Ok(result) => Ok(([(header::CONTENT_TYPE, "application/json")], result).into_response()),
        Err(e) => Err(ApiError::internal(format!("Handler failed: {}", e))),
    }
}

async fn healthcheck() -> Json<Value> {
    Json(json!({ "OK": true }))
}

async fn info(Extension(state): Extension<AppState>) -> Json<Value> {
    let handlers: Vec<String> = state
        .dispatch
        .manager()
        .list_handlers()
        .iter()
        .map(|entry| entry.name().to_string())
        .collect();

    Json(json!({
        "instance_id": state.instance_id,
        "handlers": handlers,
    }))
}
