pub mod admin;
pub mod dispatch;
pub mod rpc;
pub mod webhook;

use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Routes served on the RPC listener.
pub fn rpc_router(state: AppState) -> Router {
    Router::new()
        .nest("/rpc", rpc::router().merge(dispatch::router()))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

/// Routes served on the HTTP listener.
pub fn http_router(state: AppState) -> Router {
    Router::new()
        .nest("/webhook", webhook::router())
        .nest("/__admin", admin::router())
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
