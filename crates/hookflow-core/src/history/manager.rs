use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, TimeZone, Utc};
use hookflow_contracts::HandlerExecution;
use parking_lot::Mutex;
use regex::Regex;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retention::{self, CleanupReport};
use crate::config::HistoryConfig;
use crate::error::HistoryError;

static HISTORY_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\.\d+)?-(.+)\.json$").expect("history file name pattern is valid")
});

/// Give up on finding a free file name after this many collisions.
const MAX_FILE_NAME_ATTEMPTS: u32 = 1000;

/// `{unix_millis}-{handler_name}.json`
pub fn history_file_name(handler_name: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}-{}.json", timestamp.timestamp_millis(), handler_name)
}

/// Name used when `history_file_name` is already taken:
/// `{unix_millis}.{seq}-{handler_name}.json`
fn sequenced_file_name(handler_name: &str, timestamp: DateTime<Utc>, seq: u32) -> String {
    if seq == 0 {
        return history_file_name(handler_name, timestamp);
    }
    format!("{}.{}-{}.json", timestamp.timestamp_millis(), seq, handler_name)
}

/// Split a history file name into handler name and timestamp.
pub fn parse_history_file_name(file_name: &str) -> Option<(String, DateTime<Utc>)> {
    let captures = HISTORY_FILE_NAME.captures(file_name)?;
    let millis: i64 = captures.get(1)?.as_str().parse().ok()?;
    let timestamp = Utc.timestamp_millis_opt(millis).single()?;
    Some((captures.get(2)?.as_str().to_string(), timestamp))
}

/// Writes and queries execution records under a single directory.
pub struct HistoryManager {
    config: HistoryConfig,
    cleanup: Mutex<Option<CancellationToken>>,
}

impl HistoryManager {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            cleanup: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Persist one execution record. The directory is created on demand.
    /// Existing files are never overwritten; executions sharing a handler
    /// and start millisecond get a sequence suffix.
    pub async fn write(&self, execution: &HandlerExecution) -> Result<PathBuf, HistoryError> {
        let json = serde_json::to_vec(execution).inspect_err(|e| {
            error!(handler = %execution.handler_name, error = %e, "Failed to serialize history record");
        })?;

        tokio::fs::create_dir_all(&self.config.path)
            .await
            .inspect_err(|e| error!(path = %self.config.path.display(), error = %e, "Failed to create history directory"))?;

        let mut seq = 0;
        let (file_path, mut file) = loop {
            let file_path = self.config.path.join(sequenced_file_name(
                &execution.handler_name,
                execution.start_client_timestamp,
                seq,
            ));
            match OpenOptions::new().write(true).create_new(true).open(&file_path).await {
                Ok(file) => break (file_path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && seq < MAX_FILE_NAME_ATTEMPTS => seq += 1,
                Err(e) => {
                    error!(path = %file_path.display(), error = %e, "Failed to create history file");
                    return Err(e.into());
                }
            }
        };

        file.write_all(&json).await?;
        file.flush()
            .await
            .inspect_err(|e| error!(path = %file_path.display(), error = %e, "Failed to write history file"))?;

        debug!(
            handler = %execution.handler_name,
            invocation_id = %execution.invocation_id,
            path = %file_path.display(),
            "Wrote history record"
        );
        Ok(file_path)
    }

    /// Records of one handler, oldest first. Unparseable files are skipped;
    /// a missing directory yields an empty list. `tail > 0` keeps only the
    /// newest `tail` records.
    pub async fn get_history(
        &self,
        handler_name: &str,
        include_logs: bool,
        tail: usize,
    ) -> Result<Vec<HandlerExecution>, HistoryError> {
        let mut dir = match tokio::fs::read_dir(&self.config.path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut history = Vec::new();
        while let Some(file) = dir.next_entry().await? {
            if file.file_type().await.map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }
            let file_name = file.file_name();
            let Some((name, _)) = file_name.to_str().and_then(parse_history_file_name) else {
                warn!(file = ?file_name, "Skipping unrecognized history file");
                continue;
            };
            if name != handler_name {
                continue;
            }

            let path = file.path();
            let contents = match tokio::fs::read(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable history file");
                    continue;
                }
            };
            let mut execution: HandlerExecution = match serde_json::from_slice(&contents) {
                Ok(execution) => execution,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed history file");
                    continue;
                }
            };

            if !include_logs {
                execution.logs.clear();
            }
            history.push(execution);
        }

        history.sort_by_key(|execution| execution.start_client_timestamp);
        if tail > 0 && history.len() > tail {
            history.drain(..history.len() - tail);
        }
        Ok(history)
    }

    /// Apply the age and size limits once.
    pub async fn cleanup(&self) -> Result<CleanupReport, HistoryError> {
        let min_timestamp = chrono::Duration::from_std(self.config.max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let report =
            retention::cleanup_directory(&self.config.path, min_timestamp, self.config.max_size_bytes)
                .await?;
        info!(
            path = %self.config.path.display(),
            deleted_file_count = report.deleted(),
            remaining_bytes = report.remaining_bytes,
            "Cleaned up history directory"
        );
        Ok(report)
    }

    /// Launch the periodic cleanup task. Calling start twice is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<(), HistoryError> {
        let token = {
            let mut cleanup = self.cleanup.lock();
            if cleanup.is_some() {
                return Ok(());
            }
            let token = CancellationToken::new();
            *cleanup = Some(token.clone());
            token
        };

        tokio::fs::create_dir_all(&self.config.path).await?;
        info!(path = %self.config.path.display(), "History manager started");

        let manager = Arc::downgrade(self);
        let period = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.cleanup().await {
                    error!(error = %e, "History cleanup failed");
                }
            }
        });
        Ok(())
    }

    /// Stop the cleanup task. Idempotent.
    pub fn close(&self) {
        if let Some(token) = self.cleanup.lock().take() {
            token.cancel();
            info!("History manager closed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.cleanup.lock().is_some()
    }
}
