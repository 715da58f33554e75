// Direct Backend
// Runs scripts synchronously on the current host

use super::{script, Backend, BackendKind, JobState};
use crate::error::{ServiceError, ServiceResult};
use crate::task::{Handle, JobId, Task};

use async_trait::async_trait;
use tokio::process::Command;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};

/// Blocking backend. Tasks run to completion inside `dispatch`, so there
/// is never a job to wait on afterwards.
#[derive(Debug, Clone)]
pub struct DirectBackend {
    shell: String,
}

impl Default for DirectBackend {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
        }
    }
}

impl DirectBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

/// Substitute the `%j` placeholder used by scheduler log templates
fn expand_log_path(template: &Path, stamp: &str) -> PathBuf {
    PathBuf::from(template.to_string_lossy().replace("%j", stamp))
}

async fn write_log(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await
}

#[async_trait]
impl Backend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    fn render(&self, task: &Task) -> String {
        script::render_direct(task)
    }

    async fn dispatch(&self, task: &Task) -> ServiceResult<Handle> {
        let pending = task.upstream.flatten_to_set();
        if !pending.is_empty() {
            return Err(ServiceError::UnsupportedDependency {
                task: task.name.clone(),
                backend: self.kind().to_string(),
                jobs: pending.into_iter().map(|id| id.0).collect(),
            });
        }

        tracing::info!(task = %task.name, stage = %task.stage, "running locally");
        let output = Command::new(&self.shell)
            .arg(&task.script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            .to_string();
        write_log(&expand_log_path(&task.stdout_log, &stamp), &output.stdout).await?;
        write_log(&expand_log_path(&task.stderr_log, &stamp), &output.stderr).await?;

        if !output.status.success() {
            return Err(ServiceError::Execution {
                task: task.name.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Handle::None)
    }

    async fn status(&self, _job: JobId) -> ServiceResult<JobState> {
        // Nothing is ever left running once dispatch returns
        Ok(JobState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn scripted_task(dir: &Path, body: &str, upstream: Handle) -> Task {
        let task = Task::builder("local", "sh")
            .option("-c", body)
            .stage("deltas")
            .upstream(upstream)
            .script_path(dir.join("local.sh"))
            .log_dir(dir.join("logs"))
            .build()
            .unwrap();
        let backend = DirectBackend::new();
        script::write_script(&task.script_path, &backend.render(&task))
            .await
            .unwrap();
        task
    }

    #[tokio::test]
    async fn test_runs_to_completion_and_logs() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("done.txt");
        let body = format!("echo finished && touch {}", marker.display());
        let task = scripted_task(dir.path(), &body, Handle::None).await;

        let handle = DirectBackend::new().dispatch(&task).await.unwrap();
        assert_eq!(handle, Handle::None);
        assert!(marker.exists());

        let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(logs.len(), 2);
        let out_log = logs
            .iter()
            .find(|p| p.extension().map(|e| e == "out").unwrap_or(false))
            .unwrap();
        assert_eq!(std::fs::read_to_string(out_log).unwrap().trim(), "finished");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_execution_error() {
        let dir = TempDir::new().unwrap();
        let task = scripted_task(dir.path(), "echo broken >&2; exit 3", Handle::None).await;

        match DirectBackend::new().dispatch(&task).await {
            Err(ServiceError::Execution { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refuses_to_wait_on_jobs() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran.txt");
        let body = format!("touch {}", marker.display());
        let upstream = Handle::join(vec![Handle::None, Handle::Id(JobId(11))]);
        let task = scripted_task(dir.path(), &body, upstream).await;

        let err = DirectBackend::new().dispatch(&task).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::UnsupportedDependency { ref jobs, .. } if jobs == &vec![11]
        ));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_pass_through_upstream_is_accepted() {
        let dir = TempDir::new().unwrap();
        let upstream = Handle::join(vec![Handle::None, Handle::join(vec![Handle::None])]);
        let task = scripted_task(dir.path(), "true", upstream).await;
        assert!(DirectBackend::new().dispatch(&task).await.is_ok());
    }
}
