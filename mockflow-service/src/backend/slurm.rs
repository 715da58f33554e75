// Slurm Backend
// Submits batch scripts with sbatch and queries final state with sacct

use super::{script, Backend, BackendKind, JobState};
use crate::error::{ServiceError, ServiceResult};
use crate::task::{Handle, JobId, Task};

use async_trait::async_trait;
use tokio::process::Command;

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Queueing backend driving the Slurm command-line tools
#[derive(Debug, Clone)]
pub struct SlurmBackend {
    submit_program: PathBuf,
    status_program: PathBuf,
    status_retries: u32,
    retry_delay: Duration,
}

impl Default for SlurmBackend {
    fn default() -> Self {
        Self {
            submit_program: PathBuf::from("sbatch"),
            status_program: PathBuf::from("sacct"),
            status_retries: 10,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl SlurmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the submission and accounting executables
    pub fn with_programs(
        mut self,
        submit_program: impl Into<PathBuf>,
        status_program: impl Into<PathBuf>,
    ) -> Self {
        self.submit_program = submit_program.into();
        self.status_program = status_program.into();
        self
    }

    /// Bound the number of status queries before a job is reported failed
    pub fn with_status_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.status_retries = retries.max(1);
        self.retry_delay = delay;
        self
    }

    async fn query_state(&self, job: JobId) -> Result<Option<JobState>, String> {
        let output = Command::new(resolve(&self.status_program))
            .arg("-j")
            .arg(job.to_string())
            .args(["-o", "State", "--parsable2", "-n"])
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(JobState::parse))
    }
}

/// Prefer the executable found on PATH, falling back to the name as given
fn resolve(program: &Path) -> PathBuf {
    which::which(program).unwrap_or_else(|_| program.to_path_buf())
}

/// First run of decimal digits in the submission output
pub fn parse_job_id(stdout: &str) -> Option<JobId> {
    let start = stdout.find(|c: char| c.is_ascii_digit())?;
    let digits: String = stdout[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().map(JobId)
}

#[async_trait]
impl Backend for SlurmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Slurm
    }

    fn render(&self, task: &Task) -> String {
        script::render_batch(task)
    }

    async fn dispatch(&self, task: &Task) -> ServiceResult<Handle> {
        let submission_error = |message: String| ServiceError::Submission {
            task: task.name.clone(),
            stage: task.stage.clone(),
            message,
        };

        let program = resolve(&self.submit_program);
        let mut command = Command::new(&program);
        command.arg("--parsable");

        if let Some(clause) = script::dependency_clause(&task.upstream) {
            tracing::debug!(task = %task.name, %clause, "dependency clause");
            command.arg(clause);
        }

        // Submit from the script's directory so relative paths inside it resolve
        match (task.script_path.parent(), task.script_path.file_name()) {
            (Some(dir), Some(name)) if !dir.as_os_str().is_empty() => {
                command.current_dir(dir).arg(name);
            }
            _ => {
                command.arg(&task.script_path);
            }
        }

        let output = command.output().await.map_err(|e| {
            submission_error(format!("failed to launch {}: {}", program.display(), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(submission_error(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job = parse_job_id(&stdout).ok_or_else(|| {
            submission_error(format!("no job id in submission output '{}'", stdout.trim()))
        })?;

        tracing::info!(task = %task.name, stage = %task.stage, job = %job, "submitted");
        Ok(Handle::Id(job))
    }

    async fn status(&self, job: JobId) -> ServiceResult<JobState> {
        for attempt in 1..=self.status_retries {
            match self.query_state(job).await {
                Ok(Some(state)) => return Ok(state),
                Ok(None) => {
                    tracing::warn!(%job, attempt, "no state reported yet");
                }
                Err(message) => {
                    tracing::warn!(%job, attempt, %message, "status query failed");
                }
            }
            if attempt < self.status_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        tracing::warn!(%job, "status unavailable, assuming failure");
        Ok(JobState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_program(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn task_with(dir: &Path, upstream: Handle) -> Task {
        Task::builder("xcf_lya_qso", "picca_xcf.py")
            .stage("correlations")
            .upstream(upstream)
            .script_path(dir.join("scripts/xcf_lya_qso.sh"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id("12345\n"), Some(JobId(12345)));
        assert_eq!(parse_job_id("12345;perlmutter\n"), Some(JobId(12345)));
        assert_eq!(parse_job_id("Submitted batch job 987"), Some(JobId(987)));
        assert_eq!(parse_job_id("error"), None);
    }

    #[tokio::test]
    async fn test_dispatch_passes_dependency_clause() {
        let dir = TempDir::new().unwrap();
        let args_file = dir.path().join("args.txt");
        let sbatch = fake_program(
            dir.path(),
            "sbatch",
            &format!("echo \"$@\" > {}\necho '4242;cluster'", args_file.display()),
        );
        let backend = SlurmBackend::new().with_programs(&sbatch, "sacct");

        let task = task_with(
            dir.path(),
            Handle::join(vec![Handle::Id(JobId(2)), Handle::None, Handle::Id(JobId(1))]),
        );
        std::fs::create_dir_all(task.script_path.parent().unwrap()).unwrap();

        let handle = backend.dispatch(&task).await.unwrap();
        assert_eq!(handle, Handle::Id(JobId(4242)));

        let args = std::fs::read_to_string(&args_file).unwrap();
        assert_eq!(
            args.trim(),
            "--parsable --dependency=afterok:1,afterok:2 xcf_lya_qso.sh"
        );
    }

    #[tokio::test]
    async fn test_dispatch_failure_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let sbatch = fake_program(
            dir.path(),
            "sbatch",
            "echo 'Invalid qos specification' >&2\nexit 1",
        );
        let backend = SlurmBackend::new().with_programs(&sbatch, "sacct");
        let task = task_with(dir.path(), Handle::None);
        std::fs::create_dir_all(task.script_path.parent().unwrap()).unwrap();

        let err = backend.dispatch(&task).await.unwrap_err();
        match err {
            ServiceError::Submission { task, message, .. } => {
                assert_eq!(task, "xcf_lya_qso");
                assert!(message.contains("Invalid qos specification"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_rejects_unparsable_output() {
        let dir = TempDir::new().unwrap();
        let sbatch = fake_program(dir.path(), "sbatch", "echo 'queued'");
        let backend = SlurmBackend::new().with_programs(&sbatch, "sacct");
        let task = task_with(dir.path(), Handle::None);
        std::fs::create_dir_all(task.script_path.parent().unwrap()).unwrap();

        assert!(matches!(
            backend.dispatch(&task).await,
            Err(ServiceError::Submission { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_reads_last_state_line() {
        let dir = TempDir::new().unwrap();
        let sacct = fake_program(dir.path(), "sacct", "printf 'COMPLETED\\nCOMPLETED\\n'");
        let backend = SlurmBackend::new().with_programs("sbatch", &sacct);

        let state = backend.status(JobId(7)).await.unwrap();
        assert_eq!(state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_status_gives_up_after_bounded_retries() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let sacct = fake_program(
            dir.path(),
            "sacct",
            &format!("echo x >> {}\nexit 1", counter.display()),
        );
        let backend = SlurmBackend::new()
            .with_programs("sbatch", &sacct)
            .with_status_retries(3, Duration::from_millis(1));

        let state = backend.status(JobId(7)).await.unwrap();
        assert_eq!(state, JobState::Failed);
        let attempts = std::fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(attempts, 3);
    }
}
