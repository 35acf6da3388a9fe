//! Hookflow agent server: RPC, dispatch WebSocket, webhook and admin
//! routes over a shared [`hookflow_core::DispatchService`].

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::ServerConfig;
pub use error::ApiError;
pub use server::AgentServer;

use hookflow_core::DispatchService;
use tokio_util::sync::CancellationToken;

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchService,
    pub instance_id: String,
    /// Parent of every dispatch stream's token; cancelled on server shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(dispatch: DispatchService, instance_id: impl Into<String>) -> Self {
        Self {
            dispatch,
            instance_id: instance_id.into(),
            shutdown: CancellationToken::new(),
        }
    }
}
