//! Hookflow Traits - narrow seams between the dispatch engine and the outside world.
//!
//! - `DispatchStream`: the bidirectional session transport (send, receive, cancellation)
//! - `CronEngine`: wall-clock scheduling of agent-supplied callbacks

pub mod cron;
pub mod dispatch;

pub use cron::{CronCallback, CronEngine, CronError};
pub use dispatch::{DispatchStream, StreamError};
