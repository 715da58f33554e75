// Orchestration Events
// Progress reporting for campaign construction and submission

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for orchestration progress events
pub type ProgressSender = mpsc::UnboundedSender<OrchestrationEvent>;

/// Receiver for orchestration progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<OrchestrationEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a campaign is built and submitted
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    /// Seeds expanded, about to build realizations
    CampaignStarted {
        name: String,
        realizations: usize,
        dry_run: bool,
    },

    /// A realization's stage graph is being built
    RealizationStarted {
        realization: String,
        index: usize,
        total: usize,
    },

    /// A task reached the backend
    TaskSubmitted {
        stage: String,
        task: String,
        job_id: Option<u64>,
        dry_run: bool,
    },

    /// A task's outputs already exist
    TaskSkipped { stage: String, task: String },

    /// Every stage of a realization has been handed off
    RealizationCompleted {
        realization: String,
        submitted: usize,
        skipped: usize,
    },

    /// Cross-realization fan-in is being built
    AggregationStarted {
        variant: String,
        keys: usize,
        handles: usize,
    },

    /// Campaign finished (or stopped on an error)
    CampaignCompleted {
        name: String,
        success: bool,
        submitted: usize,
        skipped: usize,
        duration: Duration,
    },

    /// Log message (info, warning, error)
    Log { level: LogLevel, message: String },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl OrchestrationEvent {
    pub fn task_submitted(
        stage: impl Into<String>,
        task: impl Into<String>,
        job_id: Option<u64>,
        dry_run: bool,
    ) -> Self {
        Self::TaskSubmitted {
            stage: stage.into(),
            task: task.into(),
            job_id,
            dry_run,
        }
    }

    pub fn task_skipped(stage: impl Into<String>, task: impl Into<String>) -> Self {
        Self::TaskSkipped {
            stage: stage.into(),
            task: task.into(),
        }
    }

    pub fn realization_started(realization: impl Into<String>, index: usize, total: usize) -> Self {
        Self::RealizationStarted {
            realization: realization.into(),
            index,
            total,
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: OrchestrationEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: OrchestrationEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: OrchestrationEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
