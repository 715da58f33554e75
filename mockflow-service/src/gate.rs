// Idempotent Gate
// Skips tasks whose outputs already exist before they reach a backend

use crate::backend::{Backend, Submitter};
use crate::error::ServiceResult;
use crate::events::{EventSender, OrchestrationEvent, ProgressSender};
use crate::task::{Handle, JobId, Task};

use std::sync::Arc;

/// What happened to one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Skipped,
    /// `None` in dry-run mode or for synchronous backends
    Submitted(Option<JobId>),
    /// Handed to a partitioned job instead of its own submission
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub stage: String,
    pub task: String,
    pub state: TaskState,
}

/// Existence check in front of a [`Submitter`].
///
/// Nothing is cached between calls: every `maybe_run` looks at the
/// filesystem again, so re-running a whole campaign only submits what is
/// still missing.
pub struct IdempotentGate {
    submitter: Submitter,
    events: Option<ProgressSender>,
    outcomes: Vec<TaskOutcome>,
    submitted: usize,
    skipped: usize,
}

impl IdempotentGate {
    pub fn new(submitter: Submitter) -> Self {
        Self {
            submitter,
            events: None,
            outcomes: Vec::new(),
            submitted: 0,
            skipped: 0,
        }
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.events = Some(tx);
        self
    }

    /// Submit `task` unless all of its declared outputs exist, in which
    /// case its upstream handle is passed through unchanged
    pub async fn maybe_run(&mut self, task: &Task) -> ServiceResult<Handle> {
        if task.outputs_exist() {
            self.skip(task);
            return Ok(task.upstream.clone());
        }

        let handle = self.submitter.submit(task).await?;
        let job_id = handle.job_id();

        self.submitted += 1;
        self.events.send_event(OrchestrationEvent::task_submitted(
            &task.stage,
            &task.name,
            job_id.map(|id| id.0),
            self.submitter.is_dry_run(),
        ));
        self.outcomes.push(TaskOutcome {
            stage: task.stage.clone(),
            task: task.name.clone(),
            state: TaskState::Submitted(job_id),
        });

        Ok(handle)
    }

    /// Same existence check as `maybe_run`, but instead of submitting the
    /// task return its command line for a partitioned job
    pub fn defer(&mut self, task: &Task) -> Option<String> {
        if task.outputs_exist() {
            self.skip(task);
            return None;
        }
        self.outcomes.push(TaskOutcome {
            stage: task.stage.clone(),
            task: task.name.clone(),
            state: TaskState::Deferred,
        });
        Some(task.invocation())
    }

    fn skip(&mut self, task: &Task) {
        tracing::info!(task = %task.name, stage = %task.stage, "outputs present, skipping");
        self.skipped += 1;
        self.events
            .send_event(OrchestrationEvent::task_skipped(&task.stage, &task.name));
        self.outcomes.push(TaskOutcome {
            stage: task.stage.clone(),
            task: task.name.clone(),
            state: TaskState::Skipped,
        });
    }

    pub fn events(&self) -> &Option<ProgressSender> {
        &self.events
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        self.submitter.backend()
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn is_dry_run(&self) -> bool {
        self.submitter.is_dry_run()
    }

    /// Outcomes recorded since the last call
    pub fn take_outcomes(&mut self) -> Vec<TaskOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingBackend;
    use crate::events::progress_channel;
    use std::path::Path;
    use tempfile::TempDir;

    fn gate_with(backend: &Arc<RecordingBackend>) -> IdempotentGate {
        IdempotentGate::new(Submitter::new(backend.clone()))
    }

    fn task(dir: &Path, outputs: &[&str], upstream: Handle) -> Task {
        let mut builder = Task::builder("cov", "write_full_covariance")
            .stage("covariance")
            .upstream(upstream)
            .script_path(dir.join("scripts/cov.sh"));
        for output in outputs {
            builder = builder.output(dir.join(output));
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_skip_on_exists_never_calls_backend() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("full_cov.fits"), b"").unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let mut gate = gate_with(&backend);

        let upstream = Handle::join(vec![Handle::Id(JobId(5)), Handle::None]);
        let handle = gate
            .maybe_run(&task(dir.path(), &["full_cov.fits"], upstream.clone()))
            .await
            .unwrap();

        assert_eq!(handle, upstream);
        assert_eq!(backend.call_count(), 0);
        assert_eq!(gate.skipped(), 1);
        assert!(!dir.path().join("scripts/cov.sh").exists());
    }

    #[tokio::test]
    async fn test_partial_outputs_resubmit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("full_cov.fits"), b"").unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let mut gate = gate_with(&backend);

        let handle = gate
            .maybe_run(&task(
                dir.path(),
                &["full_cov.fits", "full_cov_smooth.fits"],
                Handle::None,
            ))
            .await
            .unwrap();

        assert!(handle.job_id().is_some());
        assert_eq!(backend.call_count(), 1);
        assert_eq!(gate.submitted(), 1);
    }

    #[tokio::test]
    async fn test_decision_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let mut gate = gate_with(&backend);
        let cov = task(dir.path(), &["full_cov.fits"], Handle::None);

        gate.maybe_run(&cov).await.unwrap();
        std::fs::write(dir.path().join("full_cov.fits"), b"").unwrap();
        let second = gate.maybe_run(&cov).await.unwrap();

        assert_eq!(second, Handle::None);
        assert_eq!(backend.call_count(), 1);
        let states: Vec<_> = gate.take_outcomes().into_iter().map(|o| o.state).collect();
        assert!(matches!(states[0], TaskState::Submitted(Some(_))));
        assert_eq!(states[1], TaskState::Skipped);
    }

    #[test]
    fn test_defer_returns_command_only_when_missing() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let mut gate = gate_with(&backend);
        let export = task(dir.path(), &["cf-exp.fits.gz"], Handle::None);

        assert_eq!(gate.defer(&export), Some(export.invocation()));
        std::fs::write(dir.path().join("cf-exp.fits.gz"), b"").unwrap();
        assert_eq!(gate.defer(&export), None);

        assert_eq!(backend.call_count(), 0);
        assert_eq!(gate.skipped(), 1);
        let states: Vec<_> = gate.take_outcomes().into_iter().map(|o| o.state).collect();
        assert_eq!(states, vec![TaskState::Deferred, TaskState::Skipped]);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::new());
        let (tx, mut rx) = progress_channel();
        let mut gate = gate_with(&backend).with_progress(tx);

        gate.maybe_run(&task(dir.path(), &["x.fits"], Handle::None))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            OrchestrationEvent::TaskSubmitted {
                stage,
                task,
                job_id,
                dry_run,
            } => {
                assert_eq!(stage, "covariance");
                assert_eq!(task, "cov");
                assert!(job_id.is_some());
                assert!(!dry_run);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
