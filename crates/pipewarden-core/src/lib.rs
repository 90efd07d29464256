//! Pipewarden Core Library
//!
//! Risk-aware orchestration of pipeline-improvement runs. A run is profiled
//! once, then driven through a think/gate/act/observe loop until it
//! completes or fails; every decision and result is persisted through
//! [`pipewarden_state::RunStateStore`].

pub mod config;
pub mod domain;
pub mod executor;
pub mod fakes;
pub mod gate;
pub mod metrics;
pub mod obs;
pub mod observer;
pub mod orchestrator;
pub mod planner;
pub mod profiler;
pub mod recording;
pub mod scoring;
pub mod telemetry;

pub use config::OrchestratorConfig;

pub use domain::{
    Action, ActionResult, ChangeScope, ChangedFile, CorrelationId, Decision, Effect, EntryKind,
    ExecutionPolicy, FailureCause, GateRule, HistoryEntry, Issue, PipelineMetadata,
    PipelineTarget, PipewardenError, PlannerKind, PolicyRole, Proposal, Resolution, Result,
    Review, ReviewType, RiskLevel, RunContext, RunHistory, RunId, RunStage, RunState, RunStatus,
    Severity, StartRunRequest, ToolCatalog, ToolChoice, ToolId, ToolOutput, Verdict,
    WorkflowProfile, WorkflowType,
};

pub use executor::{Executor, ExecutorConfig, ToolAdapter, ToolError, ToolInput, ToolRegistry};
pub use gate::evaluate_safety_gate;
pub use metrics::{MetricsSnapshot, METRICS};
pub use observer::{Observation, Observer, Termination};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunHandle, RunOutcome};
pub use planner::{
    BackendError, Planner, PlannerError, PlanningInput, ReasoningBackend, ReasoningPlanner,
    ReasoningRequest, RuleBasedPlanner,
};
pub use profiler::{MarkerPatterns, ProfilingError, WorkflowProfiler};
pub use recording::{load_run, RunRecorder};
pub use scoring::{LinearPenaltyScore, ScoreFunction, ScoringConfig};
pub use telemetry::{init_tracing, LogFormat};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
