//! Structured lifecycle events.
//!
//! - `RunSpan`: RAII guard entering a span tagged with the run identity
//! - `emit_*`: one function per event name
//!
//! Every event carries `run_id` and `correlation_id` taken from the explicit
//! [`RunContext`].

use tracing::{info, warn};

use crate::domain::{Decision, FailureCause, RunContext, WorkflowProfile};

pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(ctx: &RunContext) -> Self {
        let span = tracing::info_span!(
            "pipewarden.run",
            run_id = %ctx.run_id,
            correlation_id = %ctx.correlation_id,
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Un-entered span for instrumenting the spawned run future.
pub fn run_span(ctx: &RunContext) -> tracing::Span {
    tracing::info_span!(
        "pipewarden.run",
        run_id = %ctx.run_id,
        correlation_id = %ctx.correlation_id,
    )
}

pub fn emit_run_started(ctx: &RunContext, repository: &str, pipeline_path: &str) {
    info!(
        event = "run.started",
        run_id = %ctx.run_id,
        correlation_id = %ctx.correlation_id,
        repository = %repository,
        pipeline_path = %pipeline_path,
    );
}

pub fn emit_run_resumed(ctx: &RunContext, entries: usize) {
    info!(
        event = "run.resumed",
        run_id = %ctx.run_id,
        correlation_id = %ctx.correlation_id,
        entries = entries,
    );
}

pub fn emit_run_profiled(ctx: &RunContext, profile: &WorkflowProfile) {
    info!(
        event = "run.profiled",
        run_id = %ctx.run_id,
        correlation_id = %ctx.correlation_id,
        workflow_type = ?profile.workflow_type,
        change_scope = ?profile.change_scope,
        risk_level = ?profile.risk_level,
        markers = profile.markers.len(),
    );
}

pub fn emit_decision_gated(ctx: &RunContext, seq: u64, decision: &Decision) {
    info!(
        event = "decision.gated",
        run_id = %ctx.run_id,
        correlation_id = %ctx.correlation_id,
        seq = seq,
        proposed = %decision.proposal.choice,
        action = ?decision.proposal.action,
        planner = ?decision.planner,
        confidence = decision.proposal.confidence,
        verdict = decision.verdict.label(),
    );
}

pub fn emit_action_executed(
    ctx: &RunContext,
    tool: &str,
    success: bool,
    attempts: u32,
    duration_ms: u64,
) {
    info!(
        event = "action.executed",
        run_id = %ctx.run_id,
        correlation_id = %ctx.correlation_id,
        tool = %tool,
        success = success,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

pub fn emit_planner_anomaly(ctx: &RunContext, error: &dyn std::fmt::Display) {
    warn!(
        event = "planner.anomaly",
        run_id = %ctx.run_id,
        correlation_id = %ctx.correlation_id,
        error = %error,
    );
}

pub fn emit_run_finished(
    ctx: &RunContext,
    duration_ms: u64,
    decisions: u32,
    cause: Option<&FailureCause>,
) {
    match cause {
        None => info!(
            event = "run.finished",
            run_id = %ctx.run_id,
            correlation_id = %ctx.correlation_id,
            duration_ms = duration_ms,
            decisions = decisions,
            success = true,
        ),
        Some(cause) => warn!(
            event = "run.finished",
            run_id = %ctx.run_id,
            correlation_id = %ctx.correlation_id,
            duration_ms = duration_ms,
            decisions = decisions,
            success = false,
            cause = %cause,
        ),
    }
}

pub fn emit_store_write_failed(ctx: &RunContext, operation: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "store.write_failed",
        run_id = %ctx.run_id,
        correlation_id = %ctx.correlation_id,
        operation = %operation,
        error = %error,
    );
}
