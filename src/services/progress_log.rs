use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::models::progress::ProgressEntry;

enum LogMessage {
    Append(ProgressEntry),
    Flush(oneshot::Sender<()>),
}

/// Append-only progress log of one job.
///
/// All appends go through a single writer task that owns the file handle, so
/// entries are written whole and in submission order. Write failures are
/// reported through `tracing` and never reach the caller.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: Arc<PathBuf>,
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl ProgressLog {
    /// Start the writer for `path`. The file is opened lazily on the first
    /// append, so the parent directory may be created afterwards.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = Arc::new(path.into());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&path), rx));
        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an entry for writing. Returns without waiting for the write.
    pub fn append(&self, entry: ProgressEntry) {
        let status = entry.status;
        if self.tx.send(LogMessage::Append(entry)).is_err() {
            tracing::warn!(
                path = %self.path.display(),
                %status,
                "Progress log writer stopped, entry dropped"
            );
        }
    }

    /// Wait until every entry appended so far has been written out.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LogMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_writer(path: Arc<PathBuf>, mut rx: mpsc::UnboundedReceiver<LogMessage>) {
    let mut file: Option<File> = None;

    while let Some(message) = rx.recv().await {
        match message {
            LogMessage::Append(entry) => {
                if let Err(e) = write_entry(&path, &mut file, &entry).await {
                    tracing::warn!(
                        path = %path.display(),
                        status = %entry.status,
                        error = %e,
                        "Failed to append progress entry"
                    );
                }
            }
            LogMessage::Flush(done) => {
                if let Some(f) = file.as_mut() {
                    if let Err(e) = f.sync_data().await {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to sync progress log");
                    }
                }
                let _ = done.send(());
            }
        }
    }

    tracing::trace!(path = %path.display(), "Progress log writer finished");
}

async fn write_entry(
    path: &Path,
    file: &mut Option<File>,
    entry: &ProgressEntry,
) -> Result<(), ProgressLogError> {
    let bytes = serde_json::to_vec(entry)?;

    if file.is_none() {
        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        *file = Some(opened);
    }

    if let Some(f) = file.as_mut() {
        f.write_all(&bytes).await?;
        f.flush().await?;
    }
    Ok(())
}

/// Read back every entry of a progress log file.
///
/// Entries are stored as consecutive JSON objects with no separator.
pub async fn read_entries(path: impl AsRef<Path>) -> Result<Vec<ProgressEntry>, ProgressLogError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let entries = serde_json::Deserializer::from_str(&contents)
        .into_iter::<ProgressEntry>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressLogError {
    #[error("Progress log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Progress entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::command::CommandId;
    use crate::models::progress::ProgressStatus;

    #[tokio::test]
    async fn test_appends_in_order_without_separators() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::open(dir.path().join("progress.txt"));
        let id = CommandId::generate();

        log.append(ProgressEntry::now(ProgressStatus::Starting));
        log.append(ProgressEntry::now(ProgressStatus::StartCommand).for_command(&id));
        log.append(ProgressEntry::now(ProgressStatus::WroteFile).for_command(&id));
        log.flush().await;

        let raw = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(!raw.contains('\n'));

        let statuses: Vec<_> = read_entries(log.path())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                ProgressStatus::Starting,
                ProgressStatus::StartCommand,
                ProgressStatus::WroteFile
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_interleaved() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::open(dir.path().join("progress.txt"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let id = CommandId::generate();
                for _ in 0..25 {
                    log.append(
                        ProgressEntry::now(ProgressStatus::ResizeComplete)
                            .for_command(&id)
                            .with("padding", "x".repeat(512)),
                    );
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        log.flush().await;

        let entries = read_entries(log.path()).await.unwrap();
        assert_eq!(entries.len(), 200);
    }

    #[tokio::test]
    async fn test_append_failure_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::open(dir.path().join("missing").join("progress.txt"));

        log.append(ProgressEntry::now(ProgressStatus::Fail));
        log.flush().await;

        assert!(read_entries(log.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_opens_lazily_after_directory_appears() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path().join("job");
        let log = ProgressLog::open(job_dir.join("progress.txt"));

        tokio::fs::create_dir_all(&job_dir).await.unwrap();
        log.append(ProgressEntry::now(ProgressStatus::Starting));
        log.flush().await;

        assert_eq!(read_entries(log.path()).await.unwrap().len(), 1);
    }
}
