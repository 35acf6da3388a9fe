//! Transport abstraction for dispatch sessions.
//!
//! The engine never sees sockets or RPC frameworks; it drives any
//! implementation of [`DispatchStream`].

use async_trait::async_trait;
use hookflow_contracts::{DispatchMessage, DispatchRequest};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Stream closed")]
    Closed,
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// One worker connection carrying a dispatch session.
#[async_trait]
pub trait DispatchStream: Send + Sync {
    /// Push one frame to the worker.
    async fn send(&self, message: DispatchMessage) -> Result<(), StreamError>;

    /// Wait for the next frame from the worker. `None` means the worker
    /// closed its side cleanly.
    async fn recv(&self) -> Option<Result<DispatchRequest, StreamError>>;

    /// Cancelled when the connection goes away. Root of every task the
    /// session spawns.
    fn cancellation(&self) -> CancellationToken;
}
