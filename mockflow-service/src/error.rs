// Service Errors
// Error taxonomy for configuration, submission and execution failures

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a campaign, always before
/// anything is submitted
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid seed token '{token}' in '{spec}'")]
    InvalidSeedToken { spec: String, token: String },

    #[error("Seed count mismatch: {details}")]
    SeedCountMismatch { details: String },

    #[error("No seed list supplied")]
    NoSeeds,

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Stage '{stage}' requires stage '{requires}' to be enabled")]
    MissingPrerequisite { stage: String, requires: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission of '{task}' ({stage}) failed: {message}")]
    Submission {
        task: String,
        stage: String,
        message: String,
    },

    #[error("Task '{task}' exited with {}: {stderr}", exit_label(.code))]
    Execution {
        task: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Task '{task}' cannot wait on jobs {jobs:?} with the {backend} backend")]
    UnsupportedDependency {
        task: String,
        backend: String,
        jobs: Vec<u64>,
    },

    #[error("Realization {realization} failed")]
    Realization {
        realization: String,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Wrap an error with the realization it occurred in
    pub fn in_realization(self, realization: impl Into<String>) -> Self {
        Self::Realization {
            realization: realization.into(),
            source: Box::new(self),
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}
