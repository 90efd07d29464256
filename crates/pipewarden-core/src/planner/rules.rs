//! Deterministic rule-based planner.
//!
//! Order: mandatory tools as declared, the analysis phase (`optimise`), the
//! apply phase (`fix`) when issues carry suggested fixes, re-validation of a
//! changed candidate, critic review, the optional tools whose risk condition
//! holds, `resolve` when there is something worth proposing, then `complete`.

use async_trait::async_trait;

use crate::domain::{
    ChangeScope, PlannerKind, Proposal, RiskLevel, RunContext, RunState, ToolId, WorkflowProfile,
};

use super::{PlannerResult, Planner, PlanningInput};

/// Merge confidence a critic review must reach before `resolve` is proposed.
pub const RESOLVE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedPlanner;

impl RuleBasedPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Pure planning step.
    pub fn plan(&self, state: &RunState, profile: &WorkflowProfile) -> Proposal {
        let policy = &profile.policy;

        if let Some(tool) = state.missing_mandatory(policy).first() {
            return Proposal::run(*tool, format!("mandatory tool {tool} has not completed"), 1.0);
        }

        let open = |tool: ToolId| policy.contains(tool) && !state.gave_up_on(tool);

        if open(ToolId::Optimise) && !state.has_completed(ToolId::Optimise) {
            return Proposal::run(ToolId::Optimise, "analyse the pipeline for improvements", 0.85);
        }

        let fixable = state.issues_requiring_fix().count();
        if fixable > 0 && open(ToolId::Fix) && !state.has_completed(ToolId::Fix) {
            let share = fixable as f64 / state.issues.len().max(1) as f64;
            return Proposal::run(
                ToolId::Fix,
                format!("{fixable} issue(s) carry a suggested fix"),
                0.5 + 0.5 * share,
            );
        }

        if state.has_completed(ToolId::Validate)
            && !state.validation_is_current()
            && !state.has_failed(ToolId::Validate)
        {
            return Proposal::run(ToolId::Validate, "candidate changed since last validation", 0.95);
        }

        if open(ToolId::Critic) && !state.critic_is_current() {
            return Proposal::run(ToolId::Critic, "review the candidate revision", 0.8);
        }

        for tool in &policy.optional {
            let tool = *tool;
            if state.has_completed(tool) || state.gave_up_on(tool) {
                continue;
            }
            return if optional_condition_holds(tool, profile) {
                Proposal::run(tool, format!("{tool} required at {:?} risk", profile.risk_level), 0.9)
            } else {
                Proposal::skip(
                    tool,
                    format!("{tool} not needed for {:?} scope", profile.change_scope),
                    0.9,
                )
            };
        }

        let merge = state.latest_merge_confidence();
        if !state.issues.is_empty() && open(ToolId::Resolve) && !state.has_completed(ToolId::Resolve) {
            if let Some(merge) = merge.filter(|m| *m >= RESOLVE_THRESHOLD) {
                return Proposal::run(
                    ToolId::Resolve,
                    format!("open a pull request (merge confidence {merge:.2})"),
                    merge,
                );
            }
        }

        if state.has_completed(ToolId::Resolve) {
            Proposal::complete("pull request opened", 0.95)
        } else if state.issues.is_empty() {
            Proposal::complete("no issues found", 0.9)
        } else {
            let merge = merge.unwrap_or(0.0);
            Proposal::complete(
                format!("merge confidence {merge:.2} too low for a pull request"),
                1.0 - merge,
            )
        }
    }
}

/// Risk-relevant condition of an optional tool.
pub fn optional_condition_holds(tool: ToolId, profile: &WorkflowProfile) -> bool {
    match tool {
        ToolId::RiskAssess => {
            profile.risk_level == RiskLevel::High && profile.change_scope != ChangeScope::DocsOnly
        }
        ToolId::SecurityScan => profile.risk_level >= RiskLevel::Medium,
        _ => true,
    }
}

#[async_trait]
impl Planner for RuleBasedPlanner {
    fn kind(&self) -> PlannerKind {
        PlannerKind::RuleBased
    }

    async fn propose(&self, _ctx: &RunContext, input: PlanningInput<'_>) -> PlannerResult<Proposal> {
        Ok(self.plan(input.state, input.profile))
    }
}
