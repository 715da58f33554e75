// In-memory backend that records every dispatch

use super::{script, Backend, BackendKind, JobState};
use crate::error::{ServiceError, ServiceResult};
use crate::task::{Handle, JobId, Task};

use async_trait::async_trait;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub task: String,
    pub stage: String,
    pub job: JobId,
    pub dependencies: BTreeSet<JobId>,
    pub outputs: Vec<PathBuf>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    calls: Vec<Dispatched>,
}

pub struct RecordingBackend {
    state: Mutex<State>,
    fail_on: Option<String>,
    complete_outputs: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 100,
                calls: Vec::new(),
            }),
            fail_on: None,
            complete_outputs: false,
        }
    }

    /// Reject the task with this name as a submission failure
    pub fn failing_on(mut self, task: impl Into<String>) -> Self {
        self.fail_on = Some(task.into());
        self
    }

    /// Create every declared output as if the job had already finished
    pub fn completing_outputs(mut self) -> Self {
        self.complete_outputs = true;
        self
    }

    pub fn calls(&self) -> Vec<Dispatched> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn dispatched(&self, task: &str) -> Option<Dispatched> {
        self.calls().into_iter().find(|call| call.task == task)
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Slurm
    }

    fn render(&self, task: &Task) -> String {
        script::render_batch(task)
    }

    async fn dispatch(&self, task: &Task) -> ServiceResult<Handle> {
        if self.fail_on.as_deref() == Some(task.name.as_str()) {
            return Err(ServiceError::Submission {
                task: task.name.clone(),
                stage: task.stage.clone(),
                message: "sbatch: error: Batch job submission failed".to_string(),
            });
        }

        if self.complete_outputs {
            for output in &task.outputs {
                if let Some(parent) = output.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(output, b"")?;
            }
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let job = JobId(state.next_id);
        state.calls.push(Dispatched {
            task: task.name.clone(),
            stage: task.stage.clone(),
            job,
            dependencies: task.upstream.flatten_to_set(),
            outputs: task.outputs.clone(),
        });
        Ok(Handle::Id(job))
    }

    async fn status(&self, _job: JobId) -> ServiceResult<JobState> {
        Ok(JobState::Completed)
    }
}
