// Mockflow Service Library
// Job-dependency orchestration for multi-realization mock pipelines

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod partition;
pub mod realization;
pub mod stage;
pub mod task;

// Re-export commonly used types
pub use error::{ConfigError, ServiceError, ServiceResult};

// Re-export configuration types
pub use config::PipelineConfig;

// Re-export orchestration types
pub use backend::{Backend, BackendKind, ExecutionBackend, JobState, Submitter};
pub use events::{progress_channel, OrchestrationEvent, ProgressReceiver, ProgressSender};
pub use gate::IdempotentGate;
pub use partition::{partition, run_pool, run_rank};
pub use realization::{expand_seeds, realization_ids, Campaign, CampaignSummary, RealizationId};
pub use stage::{AnalysisVariant, PairType, Region, StageKind};
pub use task::{Handle, JobId, Task};
