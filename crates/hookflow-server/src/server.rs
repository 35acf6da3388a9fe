use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::api;
use crate::{AppState, ServerConfig};

/// Both listeners of the agent: the RPC surface (including the dispatch
/// WebSocket) and the webhook/admin surface.
pub struct AgentServer {
    rpc_listener: TcpListener,
    http_listener: TcpListener,
    state: AppState,
}

impl AgentServer {
    pub async fn bind(config: &ServerConfig, state: AppState) -> Result<Self> {
        let rpc_addr = config.rpc_addr();
        let rpc_listener = TcpListener::bind(&rpc_addr)
            .await
            .with_context(|| format!("Failed to bind RPC listener on {}", rpc_addr))?;

        let http_addr = config.http_addr();
        let http_listener = TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {}", http_addr))?;

        Ok(Self {
            rpc_listener,
            http_listener,
            state,
        })
    }

    pub fn rpc_addr(&self) -> Result<SocketAddr> {
        Ok(self.rpc_listener.local_addr()?)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http_listener.local_addr()?)
    }

    /// Serve until `shutdown` fires. Open dispatch streams are cancelled
    /// first so their sessions stop before the listeners drain.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("RPC server listening on {}", self.rpc_addr()?);
        info!("HTTP server listening on {}", self.http_addr()?);

        let streams = self.state.shutdown.clone();
        let stop = streams.child_token();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            info!("Agent server shutting down");
            streams.cancel();
        });

        let rpc = axum::serve(self.rpc_listener, api::rpc_router(self.state.clone()))
            .with_graceful_shutdown(stop.clone().cancelled_owned());
        let http = axum::serve(self.http_listener, api::http_router(self.state))
            .with_graceful_shutdown(stop.cancelled_owned());

        tokio::try_join!(rpc.into_future(), http.into_future())?;
        Ok(())
    }
}
