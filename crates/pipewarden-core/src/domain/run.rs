//! Run identity, inbound request shape, and lifecycle stages.

use rand::Rng;
use serde::{Deserialize, Serialize};

pub use pipewarden_state::{PipelineTarget, RunId, RunStatus};

use super::error::PipewardenError;

/// Opaque token threading one run's operations through logs and store writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// 8-digit numeric id.
    pub fn generate() -> Self {
        CorrelationId(rand::thread_rng().gen_range(10_000_000..=99_999_999u32).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        CorrelationId(s)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-run context passed explicitly to every planner, adapter and store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: RunId,
    pub correlation_id: CorrelationId,
}

impl RunContext {
    pub fn new(run_id: RunId, correlation_id: CorrelationId) -> Self {
        Self {
            run_id,
            correlation_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound request
// ---------------------------------------------------------------------------

/// One entry of the file diff summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    /// The change touches comments only.
    #[serde(default)]
    pub comment_only: bool,
}

impl From<&str> for ChangedFile {
    fn from(path: &str) -> Self {
        ChangedFile {
            path: path.to_string(),
            comment_only: false,
        }
    }
}

/// What the profiler classifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    /// Raw pipeline definition (YAML).
    pub definition: String,
    #[serde(default)]
    pub changed_files: Vec<ChangedFile>,
    /// Branch the change targets.
    pub target_branch: String,
    /// Repository default branch; the target branch when omitted.
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl PipelineMetadata {
    pub fn default_branch(&self) -> &str {
        self.default_branch.as_deref().unwrap_or(&self.target_branch)
    }
}

/// Start-run request produced by the surrounding service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRunRequest {
    pub target: PipelineTarget,
    pub trigger_source: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub metadata: PipelineMetadata,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Per-run state machine:
/// `Classifying → Thinking → Gating → Acting → Observing → {Thinking | Completed | Failed}`.
///
/// `Gating → Observing` is taken when the verdict needs no execution (skip,
/// blocked or accepted completion); any non-terminal stage may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Classifying,
    Thinking,
    Gating,
    Acting,
    Observing,
    Completed,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Classifying => "classifying",
            RunStage::Thinking => "thinking",
            RunStage::Gating => "gating",
            RunStage::Acting => "acting",
            RunStage::Observing => "observing",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Completed | RunStage::Failed)
    }

    pub fn can_transition_to(&self, next: RunStage) -> bool {
        use RunStage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Classifying, Thinking)
            | (Thinking, Gating)
            | (Gating, Acting)
            | (Gating, Observing)
            | (Acting, Observing)
            | (Observing, Thinking)
            | (Observing, Completed) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: RunStage) -> Result<RunStage, PipewardenError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipewardenError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
