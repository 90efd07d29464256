//! Error types for planners.

use crate::domain::ToolId;

/// Why a planner could not produce a usable proposal.
///
/// The orchestrator never fails a run on these: it records an anomaly and
/// substitutes the fallback proposal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlannerError {
    #[error("reasoning backend unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning backend timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("unparsable proposal: {0}")]
    Unparsable(String),

    #[error("proposal outside policy: {0}")]
    OutOfPolicy(String),

    #[error("tool {0} already completed and may not run again")]
    AlreadyCompleted(ToolId),
}

pub type PlannerResult<T> = std::result::Result<T, PlannerError>;
