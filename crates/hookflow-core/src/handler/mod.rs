//! Handler registry and trigger strategies.
//!
//! A [`HandlerEntry`] is one registered unit of work. Its strategy decides
//! how it fires: on the agent's clock (RUN_NOW, RUN_INTERVAL,
//! CRON_SCHEDULE), through an inbound webhook, or only by direct invoke.
//! Every trigger goes through [`HandlerManager::trigger`], which queues a
//! [`PendingInvocation`] on the entry's dispatch session.

mod entry;
mod invocation;
mod manager;
mod scheduled;
mod webhook;

pub use entry::{HandlerEntry, HandlerKind};
pub use invocation::{HandlerInvoke, InvocationHandle, InvocationOutcome, PendingInvocation};
pub use manager::{DISPATCH_QUEUE_CAPACITY, HandlerManager};
pub use scheduled::parse_interval;
pub use webhook::WebhookRequest;
