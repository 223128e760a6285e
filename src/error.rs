use std::path::PathBuf;

use thiserror::Error;

/// Every failure the training framework can report.
///
/// The variants follow how the trainer reacts to them:
/// - configuration errors (`MissingConfigKey`, `InvalidConfig`, unknown
///   factory names) and `PolicyViolation` are fatal and end the process
///   with a non-zero exit code,
/// - `CheckpointLoad` is only ever logged when warm-starting,
/// - `DirectoryCollision` is retried inside `RunDirectory::create`,
/// - everything raised while computing a batch propagates out of the loop.
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("missing required configuration key `{0}`")]
    MissingConfigKey(String),

    #[error("invalid configuration for `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("unknown model `{name}` (registered: {known})")]
    UnknownModel { name: String, known: String },

    #[error("unknown problem `{name}` (registered: {known})")]
    UnknownProblem { name: String, known: String },

    #[error("statistic `{0}` was never registered")]
    UnknownMetric(String),

    #[error("run directory {0} already exists")]
    DirectoryCollision(PathBuf),

    #[error("cannot load checkpoint {path}: {reason}")]
    CheckpointLoad { path: PathBuf, reason: String },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("computation failed: {0}")]
    Computation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TrainerError {
    /// Shorthand for an `InvalidConfig` error.
    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        TrainerError::InvalidConfig { key: key.into(), reason: reason.into() }
    }

    /// `true` for errors that must terminate the process right away.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TrainerError::MissingConfigKey(_)
                | TrainerError::InvalidConfig { .. }
                | TrainerError::UnknownModel { .. }
                | TrainerError::UnknownProblem { .. }
                | TrainerError::PolicyViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrainerError>;
