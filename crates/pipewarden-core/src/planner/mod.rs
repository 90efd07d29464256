//! Action planners.
//!
//! A [`Planner`] looks at the run so far and proposes the next step. Two
//! implementations share the contract:
//! - [`RuleBasedPlanner`]: deterministic policy order, also the fallback
//! - [`ReasoningPlanner`]: asks an external [`ReasoningBackend`]
//!
//! Neither sees the safety gate; every proposal is gated afterwards.

pub mod error;
pub mod reasoning;
pub mod rules;

use async_trait::async_trait;

use crate::domain::{
    PlannerKind, Proposal, RunContext, RunHistory, RunState, ToolCatalog, ToolChoice, ToolId,
    WorkflowProfile,
};

pub use error::{PlannerError, PlannerResult};
pub use reasoning::{
    parse_proposal, BackendError, ReasoningBackend, ReasoningPlanner, ReasoningRequest,
};
pub use rules::RuleBasedPlanner;

/// Everything a planner may look at.
#[derive(Debug, Clone, Copy)]
pub struct PlanningInput<'a> {
    pub state: &'a RunState,
    pub profile: &'a WorkflowProfile,
    pub history: &'a RunHistory,
    pub catalog: &'a ToolCatalog,
}

#[async_trait]
pub trait Planner: Send + Sync {
    fn kind(&self) -> PlannerKind;

    /// Propose the next step. The verdict is filled in by the safety gate.
    async fn propose(&self, ctx: &RunContext, input: PlanningInput<'_>) -> PlannerResult<Proposal>;
}

// ---------------------------------------------------------------------------
// Shared policy checks
// ---------------------------------------------------------------------------

/// A completed tool may run again only when its result went stale.
pub fn rerun_permitted(state: &RunState, tool: ToolId) -> bool {
    match tool {
        ToolId::Validate => !state.validation_is_current(),
        ToolId::Critic => !state.critic_is_current(),
        _ => false,
    }
}

/// Reject proposals naming tools the policy does not allow at this point.
pub fn check_proposable(
    state: &RunState,
    profile: &WorkflowProfile,
    choice: ToolChoice,
) -> PlannerResult<()> {
    let tool = match choice {
        ToolChoice::Complete => return Ok(()),
        ToolChoice::Tool(tool) => tool,
    };
    if !profile.policy.contains(tool) {
        return Err(PlannerError::OutOfPolicy(format!(
            "{tool} is not part of the {:?} risk policy",
            profile.risk_level
        )));
    }
    if state.has_completed(tool) && !rerun_permitted(state, tool) {
        return Err(PlannerError::AlreadyCompleted(tool));
    }
    let failures = state.failures.iter().filter(|f| f.tool == tool).count();
    if failures > 0 && (!tool.is_idempotent() || failures > 1) {
        return Err(PlannerError::OutOfPolicy(format!(
            "{tool} failed and may not be retried"
        )));
    }
    if state.was_skipped(tool) && !profile.policy.is_mandatory(tool) {
        return Err(PlannerError::OutOfPolicy(format!("{tool} was already skipped")));
    }
    Ok(())
}

/// Substitute proposal after the primary planner failed: the next missing
/// mandatory tool, else the rule-based choice, always with confidence 0.
pub fn fallback_proposal(state: &RunState, profile: &WorkflowProfile) -> Proposal {
    match state.missing_mandatory(&profile.policy).first() {
        Some(tool) => Proposal::run(
            *tool,
            format!("fallback: next mandatory tool {tool}"),
            0.0,
        ),
        None => {
            let mut proposal = RuleBasedPlanner::new().plan(state, profile).with_confidence(0.0);
            proposal.rationale = format!("fallback: {}", proposal.rationale);
            proposal
        }
    }
}
