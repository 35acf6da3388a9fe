//! Streaming delivery of queued invocations to remote workers.

mod inflight;
mod service;

pub use inflight::{InflightRequest, InflightTable};
pub use service::DispatchService;
