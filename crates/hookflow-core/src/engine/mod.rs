pub mod cron_scheduler;

pub use cron_scheduler::{CronScheduler, normalize_expression};
