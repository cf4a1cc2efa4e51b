use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Progress store file inside the output directory
pub const STATUS_FILE: &str = "processing_status.json";

/// Per-attempt error log inside the output directory
pub const ERROR_LOG_FILE: &str = "error_log.txt";

/// Failure list inside the output directory, one video ID per line
pub const FAILED_FILE: &str = "failed_videos.txt";

/// Completion state of one video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Completed,
    Failed,
}

/// Persisted record for one video identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    records: HashMap<String, ProgressRecord>,
}

/// Counts derived from the store, for status output and run summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Persisted mapping from video identifier to completion state.
///
/// Status transitions only move forward: a record that reached `completed`
/// or `failed` is never rewritten by the normal marking calls. Re-running
/// failed videos goes through `forget_failed`, which removes the records
/// outright so the forward-only invariant holds for everything that exists.
///
/// Every mutation is persisted with a replace-on-write (temp file + rename),
/// so concurrent workers never observe a partially written store.
pub struct ProgressStore {
    path: PathBuf,
    inner: Mutex<HashMap<String, ProgressRecord>>,
}

impl ProgressStore {
    /// Open the store inside an output directory, creating the directory if
    /// needed. A corrupt store file is logged and treated as empty.
    pub fn open(output_dir: &Path) -> Result<Self> {
        fs_err::create_dir_all(output_dir)
            .context("Failed to create output directory")?;

        let path = output_dir.join(STATUS_FILE);
        let records = if path.exists() {
            let content = fs_err::read_to_string(&path)
                .context("Failed to read progress store")?;
            match serde_json::from_str::<StoreFile>(&content) {
                Ok(file) => file.records,
                Err(e) => {
                    tracing::warn!("Progress store is corrupt, starting empty: {}", e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            inner: Mutex::new(records),
        })
    }

    pub fn status(&self, video_id: &str) -> Option<Status> {
        self.inner
            .lock()
            .unwrap()
            .get(video_id)
            .map(|record| record.status)
    }

    /// Record a video as pending. Terminal records are left untouched.
    pub fn mark_pending(&self, video_id: &str) -> Result<()> {
        let mut records = self.inner.lock().unwrap();
        if !records.contains_key(video_id) {
            records.insert(
                video_id.to_string(),
                ProgressRecord {
                    status: Status::Pending,
                    last_error: None,
                },
            );
            self.persist(&records)?;
        }
        Ok(())
    }

    /// Record a video as completed. No-op when the record is already terminal.
    pub fn mark_completed(&self, video_id: &str) -> Result<()> {
        self.mark_terminal(video_id, Status::Completed, None)
    }

    /// Record a video as failed with the classified error. No-op when the
    /// record is already terminal.
    pub fn mark_failed(&self, video_id: &str, error: &str) -> Result<()> {
        self.mark_terminal(video_id, Status::Failed, Some(error.to_string()))
    }

    fn mark_terminal(
        &self,
        video_id: &str,
        status: Status,
        last_error: Option<String>,
    ) -> Result<()> {
        let mut records = self.inner.lock().unwrap();
        match records.get(video_id) {
            Some(record) if record.status != Status::Pending => {
                tracing::debug!(
                    "[{}] Ignoring {:?} transition for terminal record",
                    video_id,
                    status
                );
                Ok(())
            }
            _ => {
                records.insert(video_id.to_string(), ProgressRecord { status, last_error });
                self.persist(&records)
            }
        }
    }

    /// Remove failed records for the given identifiers so they can be
    /// re-attempted. Driven by the explicit retry-failed flag.
    pub fn forget_failed(&self, video_ids: &[String]) -> Result<()> {
        let mut records = self.inner.lock().unwrap();
        let mut changed = false;
        for id in video_ids {
            if matches!(records.get(id), Some(record) if record.status == Status::Failed) {
                records.remove(id);
                changed = true;
            }
        }
        if changed {
            self.persist(&records)?;
        }
        Ok(())
    }

    pub fn counts(&self) -> StatusCounts {
        let records = self.inner.lock().unwrap();
        let mut counts = StatusCounts::default();
        for record in records.values() {
            match record.status {
                Status::Completed => counts.completed += 1,
                Status::Failed => counts.failed += 1,
                Status::Pending => counts.pending += 1,
            }
        }
        counts
    }

    fn persist(&self, records: &HashMap<String, ProgressRecord>) -> Result<()> {
        let parent = self
            .path
            .parent()
            .context("Progress store path has no parent directory")?;

        let content = serde_json::to_string_pretty(&StoreFile {
            records: records.clone(),
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temp file for progress store")?;
        temp.write_all(content.as_bytes())?;
        temp.persist(&self.path)
            .context("Failed to replace progress store")?;

        Ok(())
    }
}

/// Append-only error log: one timestamped, classified line per failed attempt
pub struct ErrorLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(ERROR_LOG_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, message: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "[{}] {}", timestamp, message)?;
        Ok(())
    }
}

/// Append-only failure list: one video ID per terminal failure
pub struct FailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(FAILED_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, video_id: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", video_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_roundtrip() {
        let dir = tempdir().unwrap();
        {
            let store = ProgressStore::open(dir.path()).unwrap();
            store.mark_pending("aaaaaaaaaaa").unwrap();
            store.mark_completed("aaaaaaaaaaa").unwrap();
            store.mark_failed("bbbbbbbbbbb", "video is unavailable").unwrap();
        }

        let store = ProgressStore::open(dir.path()).unwrap();
        assert_eq!(store.status("aaaaaaaaaaa"), Some(Status::Completed));
        assert_eq!(store.status("bbbbbbbbbbb"), Some(Status::Failed));
        assert_eq!(store.status("ccccccccccc"), None);
    }

    #[test]
    fn test_transitions_are_forward_only() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).unwrap();

        store.mark_completed("aaaaaaaaaaa").unwrap();
        store.mark_failed("aaaaaaaaaaa", "late failure").unwrap();
        assert_eq!(store.status("aaaaaaaaaaa"), Some(Status::Completed));

        store.mark_failed("bbbbbbbbbbb", "boom").unwrap();
        store.mark_pending("bbbbbbbbbbb").unwrap();
        store.mark_completed("bbbbbbbbbbb").unwrap();
        assert_eq!(store.status("bbbbbbbbbbb"), Some(Status::Failed));
    }

    #[test]
    fn test_forget_failed_allows_rerun() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).unwrap();

        store.mark_failed("aaaaaaaaaaa", "rate limited").unwrap();
        store.mark_completed("bbbbbbbbbbb").unwrap();

        store
            .forget_failed(&["aaaaaaaaaaa".to_string(), "bbbbbbbbbbb".to_string()])
            .unwrap();

        // Failed record is gone, completed record is untouched
        assert_eq!(store.status("aaaaaaaaaaa"), None);
        assert_eq!(store.status("bbbbbbbbbbb"), Some(Status::Completed));
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let dir = tempdir().unwrap();
        fs_err::write(dir.path().join(STATUS_FILE), "{not json").unwrap();

        let store = ProgressStore::open(dir.path()).unwrap();
        assert_eq!(store.counts(), StatusCounts::default());
    }

    #[test]
    fn test_counts() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).unwrap();

        store.mark_completed("aaaaaaaaaaa").unwrap();
        store.mark_completed("bbbbbbbbbbb").unwrap();
        store.mark_failed("ccccccccccc", "nope").unwrap();
        store.mark_pending("ddddddddddd").unwrap();

        let counts = store.counts();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 1);
    }

    #[test]
    fn test_failure_log_lines() {
        let dir = tempdir().unwrap();
        let log = FailureLog::new(dir.path());
        log.append("aaaaaaaaaaa").unwrap();
        log.append("bbbbbbbbbbb").unwrap();

        let content = fs_err::read_to_string(dir.path().join(FAILED_FILE)).unwrap();
        assert_eq!(content, "aaaaaaaaaaa\nbbbbbbbbbbb\n");
    }

    #[test]
    fn test_error_log_format() {
        let dir = tempdir().unwrap();
        let log = ErrorLog::new(dir.path());
        log.append("[aaaaaaaaaaa] attempt 1/3 failed: rate limited").unwrap();

        let content = fs_err::read_to_string(dir.path().join(ERROR_LOG_FILE)).unwrap();
        assert!(content.starts_with('['));
        assert!(content.contains("[aaaaaaaaaaa] attempt 1/3 failed: rate limited"));
    }
}
