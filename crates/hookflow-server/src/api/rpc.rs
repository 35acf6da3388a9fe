use axum::{
    Json, Router,
    extract::{Extension, Path},
    routing::{delete, get, post},
};
use hookflow_contracts::{
    GetHandlerHistoryRequest, GetHandlerHistoryResponse, ListHandlersResponse,
    RegisterHandlerRequest, RegisterHandlerResponse, ReportInvocationRequest,
    ReportInvocationResponse, UnregisterHandlerRequest, UnregisterHandlerResponse,
};

use crate::{ApiError, AppState};

pub fn router() -> Router {
    Router::new()
        .route("/handlers", get(list_handlers).post(register_handler))
        .route("/handlers/{id}", delete(unregister_handler))
        .route("/history", post(get_handler_history))
        .route("/invocations", post(report_invocation))
}

async fn register_handler(
    Extension(state): Extension<AppState>,
    Json(req): Json<RegisterHandlerRequest>,
) -> Result<Json<RegisterHandlerResponse>, ApiError> {
    Ok(Json(state.dispatch.register_handler(req)?))
}

async fn unregister_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Json<UnregisterHandlerResponse> {
    Json(
        state
            .dispatch
            .unregister_handler(UnregisterHandlerRequest { id })
            .await,
    )
}

async fn list_handlers(Extension(state): Extension<AppState>) -> Json<ListHandlersResponse> {
    Json(state.dispatch.list_handlers())
}

async fn get_handler_history(
    Extension(state): Extension<AppState>,
    Json(req): Json<GetHandlerHistoryRequest>,
) -> Result<Json<GetHandlerHistoryResponse>, ApiError> {
    Ok(Json(state.dispatch.get_handler_history(req).await?))
}

async fn report_invocation(
    Extension(state): Extension<AppState>,
    Json(req): Json<ReportInvocationRequest>,
) -> Json<ReportInvocationResponse> {
    Json(state.dispatch.report_invocation(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rpc_router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use hookflow_contracts::HandlerOption;
    use hookflow_core::testkit::RecordingCron;
    use hookflow_core::{DispatchConfig, DispatchService, HandlerManager, HistoryConfig, HistoryManager};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state() -> (AppState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = HandlerManager::new(Arc::new(RecordingCron::default()));
        let history = Arc::new(HistoryManager::new(HistoryConfig::at(dir.path())));
        let dispatch = DispatchService::new(manager, history, DispatchConfig::default());
        (AppState::new(dispatch, "test-instance"), dir)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (state, _dir) = test_state();
        let app = rpc_router(state.clone());
        let body = json!({
            "dispatch_id": "d1",
            "handler_name": "h1",
            "options": [{"type": "RUN_NOW"}]
        });

        let first = app
            .clone()
            .oneshot(json_request("POST", "/rpc/handlers", body.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first_id = body_json(first).await["id"].as_str().unwrap().to_string();

        let second = app
            .clone()
            .oneshot(json_request("POST", "/rpc/handlers", body))
            .await
            .unwrap();
        let second_id = body_json(second).await["id"].as_str().unwrap().to_string();
        assert_eq!(first_id, second_id);

        let listed = app
            .oneshot(Request::builder().uri("/rpc/handlers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(listed).await;
        let handlers = listed["handlers"].as_array().unwrap();
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0]["name"], "h1");
        assert_eq!(handlers[0]["is_active"], false);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_webhook_options() {
        let (state, _dir) = test_state();
        let app = rpc_router(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/rpc/handlers",
                json!({
                    "dispatch_id": "d1",
                    "handler_name": "hook",
                    "options": [{"type": "WEBHOOK", "value": "a"}, {"type": "WEBHOOK", "value": "b"}]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], 400);
    }

    #[tokio::test]
    async fn test_unregister_removes_handler() {
        let (state, _dir) = test_state();
        let id = state
            .dispatch
            .register_handler(RegisterHandlerRequest {
                dispatch_id: "d1".into(),
                handler_name: "h1".into(),
                timeout_ms: 0,
                options: vec![HandlerOption::run_now()],
            })
            .unwrap()
            .id;
        let app = rpc_router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/rpc/handlers/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.dispatch.list_handlers().handlers.is_empty());
    }

    #[tokio::test]
    async fn test_history_of_unknown_handler_is_empty() {
        let (state, _dir) = test_state();
        let app = rpc_router(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/rpc/history",
                json!({"handler_name": "nobody", "include_logs": true}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["history"], json!([]));
    }
}
