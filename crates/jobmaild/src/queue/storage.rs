//! Newline-delimited JSON queue file.
//!
//! One event per line, appended with a single write and synced before the
//! append is acknowledged. Draining reads the whole file, parses each line,
//! then truncates the file to zero length.
//!
//! `QueueStorage` itself does no locking. It must only be driven by the
//! queue actor, which serializes every operation.
//!
//! # Crash behaviour
//!
//! - An append that was acknowledged is on disk and survives a restart.
//! - An append that fails mid-write is cut back to the previous length.
//!   If that is impossible, or the process dies mid-write, the torn last
//!   line is terminated by [`QueueStorage::open`] or by the next append, so
//!   later records start on a fresh line; the torn line is then dropped by
//!   the drain's skip policy.
//! - A crash after a drain has read the file but before it has truncated it
//!   means the same events are drained again after restart.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use jobmail_core::JobEvent;
use jobmail_protocol::{encode_line, parse_notice};

use super::commands::{DrainedBatch, QueueError};

/// File-backed queue storage.
#[derive(Debug)]
pub struct QueueStorage {
    path: PathBuf,
}

impl QueueStorage {
    /// Opens (creating if needed) the queue file and repairs a torn tail.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let storage = Self { path: path.into() };

        if let Some(parent) = storage.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| storage.io_error("create directory", e))?;
            }
        }

        let mut file = storage.open_for_append().await?;
        let len = storage.file_len(&file).await?;

        if storage.has_partial_tail(&mut file, len).await? {
            warn!(
                path = %storage.path.display(),
                "Queue file ends with a partial line, terminating it"
            );
            storage.write_synced(&mut file, b"\n").await?;
        }

        Ok(storage)
    }

    /// Returns the queue file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event as a single line and syncs it to disk.
    ///
    /// A partial line left at the end of the file is terminated first, so
    /// the new record always starts on its own line. If the write fails the
    /// file is cut back to its previous length.
    pub async fn append(&mut self, event: &JobEvent) -> Result<(), QueueError> {
        let line = encode_line(event).map_err(|e| QueueError::Encode(e.to_string()))?;

        let mut file = self.open_for_append().await?;
        let len = self.file_len(&file).await?;

        let mut record = Vec::with_capacity(line.len() + 1);
        if self.has_partial_tail(&mut file, len).await? {
            warn!(
                path = %self.path.display(),
                "Queue file ends with a partial line, terminating it before append"
            );
            record.push(b'\n');
        }
        record.extend_from_slice(line.as_bytes());

        if let Err(e) = self.write_synced(&mut file, &record).await {
            if let Err(rollback) = file.set_len(len).await {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Failed to roll back partial append"
                );
            }
            return Err(e);
        }

        Ok(())
    }

    /// Reads every line, then truncates the file.
    ///
    /// Lines that fail to parse are logged and counted in
    /// `DrainedBatch::skipped`; they never abort the drain. A missing file
    /// is an empty queue. If truncation fails the events are not returned,
    /// so they stay queued for the next drain.
    pub async fn drain(&mut self) -> Result<DrainedBatch, QueueError> {
        let contents = match self.read_all().await? {
            Some(contents) => contents,
            None => return Ok(DrainedBatch::default()),
        };

        let batch = parse_lines(&self.path, &contents);

        if !contents.is_empty() {
            self.truncate().await?;
        }

        debug!(
            path = %self.path.display(),
            events = batch.events.len(),
            skipped = batch.skipped,
            "Drained queue file"
        );

        Ok(batch)
    }

    /// Counts non-blank lines currently in the file.
    pub async fn pending(&self) -> Result<usize, QueueError> {
        let count = self
            .read_all()
            .await?
            .map(|contents| {
                contents
                    .split(|b| *b == b'\n')
                    .filter(|line| !is_blank(line))
                    .count()
            })
            .unwrap_or(0);
        Ok(count)
    }

    async fn open_for_append(&self) -> Result<File, QueueError> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error("open", e))
    }

    async fn file_len(&self, file: &File) -> Result<u64, QueueError> {
        file.metadata()
            .await
            .map(|meta| meta.len())
            .map_err(|e| self.io_error("stat", e))
    }

    /// True if a non-empty file does not end with `\n`.
    async fn has_partial_tail(&self, file: &mut File, len: u64) -> Result<bool, QueueError> {
        if len == 0 {
            return Ok(false);
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .await
            .map_err(|e| self.io_error("seek", e))?;
        file.read_exact(&mut last)
            .await
            .map_err(|e| self.io_error("read", e))?;

        let [byte] = last;
        Ok(byte != b'\n')
    }

    /// Writes `bytes` at the end of the file and syncs them.
    async fn write_synced(&self, file: &mut File, bytes: &[u8]) -> Result<(), QueueError> {
        file.write_all(bytes)
            .await
            .map_err(|e| self.io_error("append", e))?;
        file.flush().await.map_err(|e| self.io_error("append", e))?;
        file.sync_data()
            .await
            .map_err(|e| self.io_error("sync", e))
    }

    async fn read_all(&self) -> Result<Option<Vec<u8>>, QueueError> {
        match fs::read(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error("read", e)),
        }
    }

    async fn truncate(&self) -> Result<(), QueueError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error("open", e))?;
        file.set_len(0)
            .await
            .map_err(|e| self.io_error("truncate", e))?;
        file.sync_all()
            .await
            .map_err(|e| self.io_error("sync", e))
    }

    fn io_error(&self, operation: &'static str, error: std::io::Error) -> QueueError {
        QueueError::Io {
            path: self.path.clone(),
            operation,
            error: error.to_string(),
        }
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Parses queue lines, skipping (and logging) malformed ones.
fn parse_lines(path: &Path, contents: &[u8]) -> DrainedBatch {
    let mut batch = DrainedBatch::default();

    for (index, line) in contents.split(|b| *b == b'\n').enumerate() {
        if is_blank(line) {
            continue;
        }
        match parse_notice(line) {
            Ok(event) => batch.events.push(event),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed queue line"
                );
                batch.skipped += 1;
            }
        }
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(node: &str, job: u32) -> JobEvent {
        JobEvent::new(
            format!("/data/p/job{job:03}/RELION_JOB_EXIT_SUCCESS"),
            node,
            format!("2024-03-01T10:00:{job:02}"),
        )
        .unwrap()
    }

    async fn open_in(dir: &TempDir) -> QueueStorage {
        QueueStorage::open(dir.path().join("jobs.jsonl")).await.unwrap()
    }

    #[tokio::test]
    async fn test_append_then_drain_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = open_in(&dir).await;

        let first = event("gpu01", 1);
        let second = event("gpu02", 2);
        storage.append(&first).await.unwrap();
        storage.append(&second).await.unwrap();
        assert_eq!(storage.pending().await.unwrap(), 2);

        let batch = storage.drain().await.unwrap();
        assert_eq!(batch.events, vec![first, second]);
        assert_eq!(batch.skipped, 0);

        assert_eq!(std::fs::read(storage.path()).unwrap().len(), 0);
        assert!(storage.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = open_in(&dir).await;
        std::fs::remove_file(storage.path()).unwrap();

        let batch = storage.drain().await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(storage.pending().await.unwrap(), 0);

        // Append recreates the file
        storage.append(&event("n", 1)).await.unwrap();
        assert_eq!(storage.drain().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        let good = r#"{"path": "/p/job001/RELION_JOB_EXIT_SUCCESS", "nodename": "n", "time": "t"}"#;
        let contents = format!(
            "{good}\nnot json\n\n{{\"path\": \"/p/nojob/RELION_JOB_EXIT_SUCCESS\", \"nodename\": \"n\", \"time\": \"t\"}}\n{good}\n"
        );
        std::fs::write(&path, contents).unwrap();

        let mut storage = QueueStorage::open(&path).await.unwrap();
        let batch = storage.drain().await.unwrap();

        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.skipped, 2);
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_torn_tail_is_repaired_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        let good = r#"{"path": "/p/job001/RELION_JOB_EXIT_SUCCESS", "nodename": "n", "time": "t"}"#;
        std::fs::write(&path, format!("{good}\n{{\"path\": \"/p/jo")).unwrap();

        let mut storage = QueueStorage::open(&path).await.unwrap();
        storage.append(&event("after", 2)).await.unwrap();

        let batch = storage.drain().await.unwrap();
        let nodes: Vec<&str> = batch.events.iter().map(|e| e.nodename()).collect();
        assert_eq!(nodes, vec!["n", "after"]);
        assert_eq!(batch.skipped, 1);
    }

    #[tokio::test]
    async fn test_events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut storage = open_in(&dir).await;
            storage.append(&event("gpu01", 7)).await.unwrap();
        }

        let mut reopened = open_in(&dir).await;
        assert_eq!(reopened.pending().await.unwrap(), 1);
        let batch = reopened.drain().await.unwrap();
        assert_eq!(batch.events, vec![event("gpu01", 7)]);
    }

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("nested").join("jobs.jsonl");

        let storage = QueueStorage::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(storage.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_after_partial_write_keeps_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = open_in(&dir).await;
        storage.append(&event("before", 1)).await.unwrap();

        // Leftover of a write that failed while the daemon kept running
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(storage.path())
            .unwrap();
        std::io::Write::write_all(&mut file, b"{\"path\": \"/").unwrap();
        drop(file);

        let good = event("good", 2);
        storage.append(&good).await.unwrap();

        let batch = storage.drain().await.unwrap();
        assert_eq!(batch.events, vec![event("before", 1), good]);
        assert_eq!(batch.skipped, 1);
    }
}
