use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::error;

use super::manager::parse_history_file_name;
use crate::error::HistoryError;

/// Outcome of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub oversize: usize,
    pub remaining_bytes: u64,
}

impl CleanupReport {
    pub fn deleted(&self) -> usize {
        self.expired + self.oversize
    }
}

struct HistoryFile {
    path: PathBuf,
    timestamp: DateTime<Utc>,
    size: u64,
}

/// Delete files older than `min_timestamp`, then the oldest remaining files
/// until the directory fits in `max_size_bytes`. File age comes from the
/// name's timestamp, falling back to the modification time.
pub(crate) async fn cleanup_directory(
    path: &Path,
    min_timestamp: DateTime<Utc>,
    max_size_bytes: u64,
) -> Result<CleanupReport, HistoryError> {
    let mut report = CleanupReport::default();
    let mut dir = match tokio::fs::read_dir(path).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(file) = dir.next_entry().await? {
        let metadata = match file.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                error!(path = %file.path().display(), error = %e, "Failed to get file info");
                continue;
            }
        };
        let named = file
            .file_name()
            .to_str()
            .and_then(parse_history_file_name)
            .map(|(_, timestamp)| timestamp);
        let timestamp = match named {
            Some(timestamp) => timestamp,
            None => match metadata.modified() {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(_) => continue,
            },
        };
        files.push(HistoryFile {
            path: file.path(),
            timestamp,
            size: metadata.len(),
        });
    }

    // Newest first, so the size budget is spent on recent records.
    files.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut budget = max_size_bytes;
    let mut over_budget = false;
    for file in files {
        let expired = file.timestamp < min_timestamp;
        over_budget = over_budget || (!expired && file.size > budget);
        if !expired && !over_budget {
            budget -= file.size;
            report.remaining_bytes += file.size;
            continue;
        }

        match tokio::fs::remove_file(&file.path).await {
            Ok(()) if expired => report.expired += 1,
            Ok(()) => report.oversize += 1,
            Err(e) => {
                error!(path = %file.path.display(), error = %e, "Failed to remove history file");
                report.remaining_bytes += file.size;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::history_file_name;
    use chrono::Duration;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, timestamp: DateTime<Utc>, size: usize) -> PathBuf {
        let path = dir.join(history_file_name(name, timestamp));
        std::fs::write(&path, vec![b'x'; size]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_removes_expired_files() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let old = write_file(dir.path(), "h", now - Duration::days(8), 10);
        let fresh = write_file(dir.path(), "h", now - Duration::hours(1), 10);

        let report = cleanup_directory(dir.path(), now - Duration::days(7), 1024)
            .await
            .unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.oversize, 0);
        assert_eq!(report.remaining_bytes, 10);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_removes_oldest_over_size_budget() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let oldest = write_file(dir.path(), "h", now - Duration::minutes(3), 40);
        let middle = write_file(dir.path(), "h", now - Duration::minutes(2), 40);
        let newest = write_file(dir.path(), "h", now - Duration::minutes(1), 40);

        let report = cleanup_directory(dir.path(), now - Duration::days(7), 100)
            .await
            .unwrap();

        assert_eq!(report.oversize, 1);
        assert_eq!(report.remaining_bytes, 80);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(newest.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let report = cleanup_directory(&dir.path().join("missing"), Utc::now(), 10)
            .await
            .unwrap();
        assert_eq!(report, CleanupReport::default());
    }
}
