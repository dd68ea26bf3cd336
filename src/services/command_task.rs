use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::command::{Command, CommandId};
use crate::models::progress::{ProgressEntry, ProgressStatus};
use crate::services::operation::{wait_until_ready, Gate};
use crate::services::progress_log::ProgressLog;
use crate::services::transform::{TransformAdapter, TransformError, TransformParams};

/// Lifecycle of one command task. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Queued,
    Running,
    Written,
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Written | Self::Failed(_))
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Written | Self::Failed(_) => 2,
        }
    }
}

/// Shared, monotonic task state.
#[derive(Debug, Default)]
pub struct TaskStateCell(Mutex<TaskState>);

impl TaskStateCell {
    pub fn get(&self) -> TaskState {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Move to `next` if it is later in the lifecycle. Returns whether the
    /// state changed.
    pub fn advance(&self, next: TaskState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() || next.rank() <= state.rank() {
            return false;
        }
        *state = next;
        true
    }
}

/// Terminal failure of one command, reported to the job aggregate.
#[derive(Debug, Clone, thiserror::Error)]
#[error("command {command_id} ({target_filename}) failed: {reason}")]
pub struct CommandFailure {
    pub command_id: CommandId,
    pub target_filename: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("job not ready: {0}")]
    NotReady(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("transform worker aborted: {0}")]
    Aborted(String),
}

/// Unit of work producing one output file of a job.
pub struct CommandTask {
    id: CommandId,
    command: Command,
    output_dir: PathBuf,
    progress: ProgressLog,
    adapter: Arc<dyn TransformAdapter>,
    state: Arc<TaskStateCell>,
}

impl CommandTask {
    pub fn new(
        id: CommandId,
        command: Command,
        output_dir: PathBuf,
        progress: ProgressLog,
        adapter: Arc<dyn TransformAdapter>,
        state: Arc<TaskStateCell>,
    ) -> Self {
        Self {
            id,
            command,
            output_dir,
            progress,
            adapter,
            state,
        }
    }

    /// Wait for the job's readiness gate, then transform, write and log.
    pub async fn run(self, gate: Gate) -> Result<CommandId, CommandFailure> {
        let source = match wait_until_ready(&gate).await {
            Ok(source) => source,
            Err(reason) => return Err(self.fail(CommandError::NotReady(reason))),
        };

        self.state.advance(TaskState::Running);
        self.progress.append(
            ProgressEntry::now(ProgressStatus::StartCommand)
                .for_command(&self.id)
                .with("command", &self.command),
        );
        tracing::debug!(command_id = %self.id, filename = %self.command.target_filename, "Command started");

        let params = TransformParams::for_command(&self.command, source.format);
        let adapter = Arc::clone(&self.adapter);
        let transformed = tokio::task::spawn_blocking(move || adapter.apply(&source, &params))
            .await
            .map_err(|e| CommandError::Aborted(e.to_string()))
            .and_then(|result| result.map_err(CommandError::from));
        let bytes = match transformed {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(e)),
        };
        self.progress
            .append(ProgressEntry::now(ProgressStatus::ResizeComplete).for_command(&self.id));

        let path = self.output_dir.join(&self.command.target_filename);
        if let Err(source) = tokio::fs::write(&path, &bytes).await {
            return Err(self.fail(CommandError::Write { path, source }));
        }

        self.state.advance(TaskState::Written);
        self.progress.append(
            ProgressEntry::now(ProgressStatus::WroteFile)
                .for_command(&self.id)
                .with("filename", &self.command.target_filename),
        );
        tracing::info!(
            command_id = %self.id,
            path = %path.display(),
            bytes = bytes.len(),
            "Command wrote output"
        );

        Ok(self.id)
    }

    fn fail(&self, error: CommandError) -> CommandFailure {
        let reason = error.to_string();
        tracing::warn!(command_id = %self.id, error = %error, "Command failed");
        metrics::counter!("image_commands_failed").increment(1);

        self.state.advance(TaskState::Failed(reason.clone()));
        self.progress.append(
            ProgressEntry::now(ProgressStatus::Error)
                .for_command(&self.id)
                .with("reason", &reason),
        );

        CommandFailure {
            command_id: self.id.clone(),
            target_filename: self.command.target_filename.clone(),
            reason,
        }
    }
}
