//! Domain-level error taxonomy for pipewarden.

use pipewarden_state::StorageError;
use serde::{Deserialize, Serialize};

use super::tool::ToolId;

/// Pipewarden domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PipewardenError {
    #[error("profiling failed: {0}")]
    Profiling(#[from] crate::profiler::ProfilingError),

    #[error("planner unavailable: {0}")]
    PlannerUnavailable(#[from] crate::planner::PlannerError),

    #[error("tool {tool} failed: {reason}")]
    ToolExecution { tool: ToolId, reason: String },

    #[error("store write failed: {0}")]
    StoreWrite(#[from] StorageError),

    #[error("store write timed out after {timeout_ms}ms during {operation}")]
    StoreTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("no progress: iteration cap {cap} exceeded")]
    IterationCapExceeded { cap: u32 },

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("run {run_id} already finished with status {status}")]
    RunAlreadyFinished { run_id: String, status: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("corrupt history: {0}")]
    CorruptHistory(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run task aborted: {0}")]
    TaskAborted(String),
}

/// Result type for pipewarden domain operations.
pub type Result<T> = std::result::Result<T, PipewardenError>;

/// Structured cause attached to a FAILED run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// Pipeline input could not be classified; no decision was recorded.
    Profiling { detail: String },
    /// A mandatory tool failed after any permitted retries.
    MandatoryToolFailed { tool: ToolId, error: String },
    /// The audit trail could not be written.
    StoreWriteFailure { detail: String },
    /// The loop reached its iteration cap without finishing.
    IterationCapExceeded { cap: u32 },
    /// An external cancellation request stopped the loop.
    Cancelled,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Profiling { detail } => write!(f, "profiling failed: {detail}"),
            FailureCause::MandatoryToolFailed { tool, error } => {
                write!(f, "mandatory tool {tool} failed: {error}")
            }
            FailureCause::StoreWriteFailure { detail } => write!(f, "store write failed: {detail}"),
            FailureCause::IterationCapExceeded { cap } => {
                write!(f, "no progress: iteration cap {cap} exceeded")
            }
            FailureCause::Cancelled => f.write_str("cancelled by request"),
        }
    }
}

impl From<&PipewardenError> for FailureCause {
    fn from(err: &PipewardenError) -> Self {
        match err {
            PipewardenError::Profiling(e) => FailureCause::Profiling {
                detail: e.to_string(),
            },
            PipewardenError::ToolExecution { tool, reason } => FailureCause::MandatoryToolFailed {
                tool: *tool,
                error: reason.clone(),
            },
            PipewardenError::IterationCapExceeded { cap } => {
                FailureCause::IterationCapExceeded { cap: *cap }
            }
            PipewardenError::Cancelled => FailureCause::Cancelled,
            other => FailureCause::StoreWriteFailure {
                detail: other.to_string(),
            },
        }
    }
}
