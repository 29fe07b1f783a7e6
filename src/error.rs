/// Engine error taxonomy
///
/// These errors surface to callers of the engine API (registration, runs, signals,
/// schedules). Step-level failures never use this type: executors report them
/// through `StepResult` so the engine can decide on retries.

use crate::runtime::run::RunStatus;
use thiserror::Error;

/// Errors returned by the public engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow '{0}' is not active")]
    WorkflowInactive(String),

    #[error("invalid workflow definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {run_id} is already {status}")]
    RunTerminated { run_id: String, status: RunStatus },

    #[error("run {run_id} is still {status}")]
    RunActive { run_id: String, status: RunStatus },

    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Persistence failures bubbling up from sqlx/serde
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid_definition(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
