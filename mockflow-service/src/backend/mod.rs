// Execution Backends
// Submission of rendered tasks to a batch scheduler or the local shell

pub mod direct;
pub mod script;
pub mod slurm;

#[cfg(test)]
pub(crate) mod testing;

pub use direct::DirectBackend;
pub use slurm::SlurmBackend;

use crate::error::{ConfigError, ServiceResult};
use crate::task::{Handle, JobId, Task};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// The two execution substrates a campaign can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Queueing scheduler with dependency clauses
    #[default]
    Slurm,
    /// Blocking local execution
    Direct,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Slurm => write!(f, "slurm"),
            BackendKind::Direct => write!(f, "direct"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slurm" => Ok(BackendKind::Slurm),
            "direct" | "bash" => Ok(BackendKind::Direct),
            other => Err(ConfigError::Invalid(format!("unknown backend '{}'", other))),
        }
    }
}

/// Final (or current) scheduler state of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    Other(String),
}

impl JobState {
    /// Parse a scheduler state word such as `COMPLETED` or `CANCELLED by 42`
    pub fn parse(state: &str) -> Self {
        let word = state.split_whitespace().next().unwrap_or("");
        match word.trim_end_matches('+') {
            "PENDING" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "COMPLETED" => JobState::Completed,
            "FAILED" | "OUT_OF_MEMORY" | "NODE_FAIL" => JobState::Failed,
            "CANCELLED" => JobState::Cancelled,
            "TIMEOUT" => JobState::Timeout,
            other => JobState::Other(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Completed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
            JobState::Timeout => write!(f, "TIMEOUT"),
            JobState::Other(state) => write!(f, "{}", state),
        }
    }
}

/// An execution substrate
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Script text for a task
    fn render(&self, task: &Task) -> String;

    /// Submit or run a task whose script is already on disk
    async fn dispatch(&self, task: &Task) -> ServiceResult<Handle>;

    /// Look up the state of a submitted job
    async fn status(&self, job: JobId) -> ServiceResult<JobState>;
}

/// Backend selected once from configuration
#[derive(Debug, Clone)]
pub enum ExecutionBackend {
    Slurm(SlurmBackend),
    Direct(DirectBackend),
}

impl ExecutionBackend {
    pub fn new(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Slurm => ExecutionBackend::Slurm(SlurmBackend::new()),
            BackendKind::Direct => ExecutionBackend::Direct(DirectBackend::new()),
        }
    }
}

#[async_trait]
impl Backend for ExecutionBackend {
    fn kind(&self) -> BackendKind {
        match self {
            ExecutionBackend::Slurm(backend) => backend.kind(),
            ExecutionBackend::Direct(backend) => backend.kind(),
        }
    }

    fn render(&self, task: &Task) -> String {
        match self {
            ExecutionBackend::Slurm(backend) => backend.render(task),
            ExecutionBackend::Direct(backend) => backend.render(task),
        }
    }

    async fn dispatch(&self, task: &Task) -> ServiceResult<Handle> {
        match self {
            ExecutionBackend::Slurm(backend) => backend.dispatch(task).await,
            ExecutionBackend::Direct(backend) => backend.dispatch(task).await,
        }
    }

    async fn status(&self, job: JobId) -> ServiceResult<JobState> {
        match self {
            ExecutionBackend::Slurm(backend) => backend.status(job).await,
            ExecutionBackend::Direct(backend) => backend.status(job).await,
        }
    }
}

/// One line of the submission ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub task: String,
    pub stage: String,
    pub script: PathBuf,
    pub job_id: Option<JobId>,
    pub dependencies: Vec<JobId>,
    pub dry_run: bool,
}

/// Writes scripts and hands them to a backend
pub struct Submitter {
    backend: Arc<dyn Backend>,
    dry_run: bool,
    jobid_log: Option<PathBuf>,
    records: Vec<SubmissionRecord>,
}

impl Submitter {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            dry_run: false,
            jobid_log: None,
            records: Vec::new(),
        }
    }

    /// Write scripts without submitting them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Append `<script> <job id>` lines for every real submission
    pub fn with_jobid_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.jobid_log = Some(path.into());
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn records(&self) -> &[SubmissionRecord] {
        &self.records
    }

    /// Persist the script, then submit it unless this is a dry run
    pub async fn submit(&mut self, task: &Task) -> ServiceResult<Handle> {
        let text = self.backend.render(task);
        script::write_script(&task.script_path, &text).await?;

        let dependencies: Vec<JobId> = task.upstream.flatten_to_set().into_iter().collect();

        if self.dry_run {
            tracing::info!(task = %task.name, script = %task.script_path.display(), "dry run, script written");
            self.records.push(SubmissionRecord {
                task: task.name.clone(),
                stage: task.stage.clone(),
                script: task.script_path.clone(),
                job_id: None,
                dependencies,
                dry_run: true,
            });
            return Ok(Handle::None);
        }

        let handle = self.backend.dispatch(task).await?;
        let job_id = handle.job_id();

        if let (Some(log), Some(id)) = (&self.jobid_log, job_id) {
            append_jobid(log, &task.script_path, id).await?;
        }

        self.records.push(SubmissionRecord {
            task: task.name.clone(),
            stage: task.stage.clone(),
            script: task.script_path.clone(),
            job_id,
            dependencies,
            dry_run: false,
        });

        Ok(handle)
    }

    /// Write the ledger as JSON lines
    pub async fn write_ledger(&self, path: &Path) -> ServiceResult<()> {
        let mut text = String::new();
        for record in &self.records {
            text.push_str(&serde_json::to_string(record)?);
            text.push('\n');
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, text).await?;
        Ok(())
    }
}

async fn append_jobid(log: &Path, script: &Path, id: JobId) -> std::io::Result<()> {
    if let Some(parent) = log.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let name = script
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .await?;
    file.write_all(format!("{} {}\n", name, id).as_bytes()).await?;
    file.flush().await
}
