//! Append-only execution history, one JSON file per invocation.

mod manager;
mod retention;

pub use manager::{HistoryManager, history_file_name, parse_history_file_name};
pub use retention::CleanupReport;
