use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use garde::Validate;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::command::{Command, CommandId, Transform, PROGRESS_FILE_NAME};
use crate::models::job::{JobOptions, JobOutcome};
use crate::models::progress::{ProgressEntry, ProgressStatus};
use crate::services::command_task::{CommandFailure, CommandTask, TaskState, TaskStateCell};
use crate::services::progress_log::ProgressLog;
use crate::services::transform::{ImageTransformer, SourceImage, TransformAdapter, TransformError};

/// Internal readiness gate value.
#[derive(Debug, Clone)]
pub enum Readiness {
    Pending,
    Ready(Arc<SourceImage>),
    Failed(String),
}

/// Readiness gate shared by the operation and its tasks.
pub type Gate = Arc<watch::Sender<Readiness>>;

/// Public view of the readiness gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Pending,
    Ready,
    Failed(String),
}

/// Wait for the gate to resolve. Returns the shared source image, or the
/// readiness failure reason.
pub async fn wait_until_ready(gate: &Gate) -> Result<Arc<SourceImage>, String> {
    let mut rx = gate.subscribe();
    let resolved = rx
        .wait_for(|r| !matches!(r, Readiness::Pending))
        .await
        .map_err(|_| "readiness gate dropped before resolving".to_string())?;
    match &*resolved {
        Readiness::Ready(source) => Ok(Arc::clone(source)),
        Readiness::Failed(reason) => Err(reason.clone()),
        Readiness::Pending => Err("readiness gate still pending".to_string()),
    }
}

/// A command as submitted to an operation.
#[derive(Debug, Clone)]
pub struct SubmittedCommand {
    pub id: CommandId,
    pub command: Command,
    state: Arc<TaskStateCell>,
}

impl SubmittedCommand {
    pub fn state(&self) -> TaskState {
        self.state.get()
    }
}

/// Owned handle to a job's aggregate outcome. Clones resolve to the same value.
pub type CompletionFuture = Shared<BoxFuture<'static, JobOutcome>>;

type TaskHandle = JoinHandle<Result<CommandId, CommandFailure>>;

struct OpenPhase {
    closed: bool,
    commands: Vec<SubmittedCommand>,
    /// Detached handles; dropping them never cancels a task.
    tasks: Vec<TaskHandle>,
}

struct Inner {
    id: Uuid,
    source_path: PathBuf,
    output_dir: PathBuf,
    progress: ProgressLog,
    adapter: Arc<dyn TransformAdapter>,
    gate: Gate,
    open: Mutex<OpenPhase>,
    completion: OnceLock<CompletionFuture>,
    started_at: Instant,
}

impl Inner {
    fn lock_open(&self) -> MutexGuard<'_, OpenPhase> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One job: a readiness gate, the command tasks fanned out behind it, and
/// the aggregate outcome.
///
/// The outcome is only failed or succeeded as a whole. Outputs already written
/// by successful commands are left in place when a sibling fails, so the
/// output directory is advisory until `complete` reports success.
#[derive(Clone)]
pub struct JobOperation {
    inner: Arc<Inner>,
}

impl JobOperation {
    /// Start a job using the `image`-backed transformer.
    pub fn create(
        source_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        options: JobOptions,
    ) -> Result<Self, OperationError> {
        Self::create_with_adapter(source_path, output_dir, options, Arc::new(ImageTransformer::default()))
    }

    /// Start a job. Loading the source and creating the output directory run
    /// in the background; commands may be added immediately.
    ///
    /// Initial commands are validated before anything starts.
    pub fn create_with_adapter(
        source_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        options: JobOptions,
        adapter: Arc<dyn TransformAdapter>,
    ) -> Result<Self, OperationError> {
        let JobOptions { transform, commands } = options;
        validate_batch(&commands)?;

        let source_path = source_path.into();
        let output_dir = output_dir.into();
        let id = Uuid::new_v4();
        let progress = ProgressLog::open(output_dir.join(PROGRESS_FILE_NAME));
        let (gate, _) = watch::channel(Readiness::Pending);
        let gate = Arc::new(gate);

        tracing::info!(
            job_id = %id,
            source = %source_path.display(),
            output_dir = %output_dir.display(),
            "Starting job operation"
        );
        metrics::counter!("image_jobs_total").increment(1);

        tokio::spawn(prepare(
            id,
            source_path.clone(),
            output_dir.clone(),
            transform,
            Arc::clone(&adapter),
            progress.clone(),
            Arc::clone(&gate),
        ));

        let operation = Self {
            inner: Arc::new(Inner {
                id,
                source_path,
                output_dir,
                progress,
                adapter,
                gate,
                open: Mutex::new(OpenPhase {
                    closed: false,
                    commands: Vec::new(),
                    tasks: Vec::new(),
                }),
                completion: OnceLock::new(),
                started_at: Instant::now(),
            }),
        };

        for command in commands {
            operation.add_command(command)?;
        }
        Ok(operation)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn source_path(&self) -> &Path {
        &self.inner.source_path
    }

    pub fn output_directory(&self) -> &Path {
        &self.inner.output_dir
    }

    pub fn progress_path(&self) -> &Path {
        self.inner.progress.path()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_open().closed
    }

    pub fn readiness(&self) -> ReadinessState {
        match &*self.inner.gate.borrow() {
            Readiness::Pending => ReadinessState::Pending,
            Readiness::Ready(_) => ReadinessState::Ready,
            Readiness::Failed(reason) => ReadinessState::Failed(reason.clone()),
        }
    }

    /// Commands submitted so far, in submission order.
    pub fn commands(&self) -> Vec<SubmittedCommand> {
        self.inner.lock_open().commands.clone()
    }

    pub fn task_states(&self) -> Vec<(CommandId, TaskState)> {
        self.inner
            .lock_open()
            .commands
            .iter()
            .map(|c| (c.id.clone(), c.state()))
            .collect()
    }

    /// Submit a command and spawn its task. The task waits for the readiness
    /// gate on its own, so this never blocks.
    pub fn add_command(&self, command: Command) -> Result<CommandId, OperationError> {
        let mut open = self.inner.lock_open();
        if open.closed {
            return Err(OperationError::Closed);
        }
        command.validate()?;
        if let Some(existing) = open
            .commands
            .iter()
            .find(|c| c.command.target_filename == command.target_filename)
        {
            return Err(OperationError::DuplicateFilename(existing.command.target_filename.clone()));
        }

        let id = loop {
            let candidate = CommandId::generate();
            if open.commands.iter().all(|c| c.id != candidate) {
                break candidate;
            }
        };
        let state = Arc::new(TaskStateCell::default());
        let task = CommandTask::new(
            id.clone(),
            command.clone(),
            self.inner.output_dir.clone(),
            self.inner.progress.clone(),
            Arc::clone(&self.inner.adapter),
            Arc::clone(&state),
        );
        open.tasks.push(tokio::spawn(task.run(Arc::clone(&self.inner.gate))));
        open.commands.push(SubmittedCommand {
            id: id.clone(),
            command,
            state,
        });

        tracing::debug!(job_id = %self.inner.id, command_id = %id, "Command submitted");
        Ok(id)
    }

    /// Close the job to new commands and return a handle to the aggregate
    /// outcome.
    ///
    /// The job is closed as soon as this returns, whether or not the handle is
    /// awaited. The first call starts the aggregation; every call, concurrent
    /// or later, resolves to the same outcome without re-running any work.
    pub fn complete(&self) -> CompletionFuture {
        self.inner
            .completion
            .get_or_init(|| self.start_completion())
            .clone()
    }

    fn start_completion(&self) -> CompletionFuture {
        let tasks = {
            let mut open = self.inner.lock_open();
            open.closed = true;
            std::mem::take(&mut open.tasks)
        };
        tracing::debug!(job_id = %self.inner.id, tasks = tasks.len(), "Job closed to new commands");

        // Detached: the outcome is recorded even if no caller awaits it.
        let handle = tokio::spawn(aggregate(Arc::clone(&self.inner), tasks));
        async move {
            handle
                .await
                .unwrap_or_else(|e| JobOutcome::failed(format!("completion task aborted: {e}")))
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for JobOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOperation")
            .field("id", &self.inner.id)
            .field("source_path", &self.inner.source_path)
            .field("output_dir", &self.inner.output_dir)
            .field("readiness", &self.readiness())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn validate_batch(commands: &[Command]) -> Result<(), OperationError> {
    for (index, command) in commands.iter().enumerate() {
        command.validate()?;
        if commands[..index]
            .iter()
            .any(|c| c.target_filename == command.target_filename)
        {
            return Err(OperationError::DuplicateFilename(command.target_filename.clone()));
        }
    }
    Ok(())
}

/// Readiness gate: decode the source and create the output directory
/// concurrently, then open the gate.
async fn prepare(
    job_id: Uuid,
    source_path: PathBuf,
    output_dir: PathBuf,
    transform: Option<Transform>,
    adapter: Arc<dyn TransformAdapter>,
    progress: ProgressLog,
    gate: Gate,
) {
    let create_dir = async {
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| ReadinessError::OutputDirectory {
                path: output_dir.clone(),
                source,
            })?;
        progress.append(
            ProgressEntry::now(ProgressStatus::Starting)
                .with("jobId", job_id)
                .with("source", source_path.display().to_string()),
        );
        Ok::<_, ReadinessError>(())
    };

    let (source, dir) = tokio::join!(load_source(&source_path, transform, adapter), create_dir);
    let readiness = match source.and_then(|source| dir.map(|()| source)) {
        Ok(source) => {
            let (width, height) = source.dimensions();
            tracing::info!(job_id = %job_id, width, height, "Job ready");
            Readiness::Ready(Arc::new(source))
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Job readiness failed");
            Readiness::Failed(e.to_string())
        }
    };
    gate.send_replace(readiness);
}

async fn load_source(
    path: &Path,
    transform: Option<Transform>,
    adapter: Arc<dyn TransformAdapter>,
) -> Result<SourceImage, ReadinessError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ReadinessError::SourceUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
    tokio::task::spawn_blocking(move || adapter.decode(&bytes, transform.as_ref()))
        .await
        .map_err(|e| ReadinessError::Aborted(e.to_string()))?
        .map_err(ReadinessError::Decode)
}

/// Barrier over the readiness gate and every task, then record the outcome.
async fn aggregate(inner: Arc<Inner>, tasks: Vec<TaskHandle>) -> JobOutcome {
    let readiness = wait_until_ready(&inner.gate).await.map(drop);

    let mut failures = Vec::new();
    for joined in futures::future::join_all(tasks).await {
        match joined {
            Ok(Ok(command_id)) => {
                tracing::trace!(job_id = %inner.id, command_id = %command_id, "Command task joined");
            }
            Ok(Err(failure)) => failures.push(failure.to_string()),
            Err(e) => failures.push(format!("command task aborted: {e}")),
        }
    }

    // A readiness failure is the root cause of every task failure.
    let outcome = match readiness {
        Err(reason) => JobOutcome::failed(reason),
        Ok(()) if failures.is_empty() => JobOutcome::succeeded(),
        Ok(()) => JobOutcome::failed(failures.join("; ")),
    };

    let elapsed = inner.started_at.elapsed();
    metrics::histogram!("image_job_duration_seconds").record(elapsed.as_secs_f64());
    match &outcome.reason {
        None => {
            inner
                .progress
                .append(ProgressEntry::now(ProgressStatus::OperationComplete));
            metrics::counter!("image_jobs_succeeded").increment(1);
            tracing::info!(
                job_id = %inner.id,
                duration_ms = elapsed.as_millis() as u64,
                "Job operation complete"
            );
        }
        Some(reason) => {
            inner
                .progress
                .append(ProgressEntry::now(ProgressStatus::Fail).with("reason", reason));
            metrics::counter!("image_jobs_failed").increment(1);
            tracing::warn!(job_id = %inner.id, reason = %reason, "Job operation failed");
        }
    }
    inner.progress.flush().await;

    outcome
}

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("Failed to read source image {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to decode source image: {0}")]
    Decode(TransformError),

    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Source decoding aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("command issued after operation ended")]
    Closed,

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] garde::Report),

    #[error("duplicate target filename {0}")]
    DuplicateFilename(String),
}
