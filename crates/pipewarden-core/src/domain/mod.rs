//! Domain model for pipewarden runs.
//!
//! - `tool`: tool identifiers, the `complete` sentinel, the tool catalog
//! - `profile`: workflow classification and execution policy
//! - `run`: identifiers, inbound request, lifecycle stages
//! - `decision`: proposals, verdicts, recorded decisions
//! - `outcome`: issues, reviews, action results
//! - `history`: the append-only entry arena
//! - `state`: `RunState`, the projection folded from history

pub mod decision;
pub mod error;
pub mod history;
pub mod outcome;
pub mod profile;
pub mod run;
pub mod state;
pub mod tool;

pub use decision::{Action, Decision, Effect, GateRule, PlannerKind, Proposal, Verdict};
pub use error::{FailureCause, PipewardenError, Result};
pub use history::{EntryKind, HistoryEntry, Resolution, RunHistory};
pub use outcome::{ActionResult, Issue, Review, ReviewType, Severity, ToolOutput};
pub use profile::{
    ChangeScope, ExecutionPolicy, PolicyRole, RiskLevel, WorkflowProfile, WorkflowType,
};
pub use run::{
    ChangedFile, CorrelationId, PipelineMetadata, PipelineTarget, RunContext, RunId, RunStage,
    RunStatus, StartRunRequest,
};
pub use state::{RunState, SkippedTool, ToolFailure};
pub use tool::{ToolCatalog, ToolChoice, ToolId, ToolSpec};
