//! Safety gate.
//!
//! [`evaluate_safety_gate`] checks a planner [`Proposal`] against the run's
//! state and profile and returns exactly one [`Verdict`]. Rules are checked
//! in a fixed precedence order; the first one that fires decides.
//!
//! The gate is a pure function: no I/O, no clock, no randomness.

use crate::domain::{
    Action, GateRule, Proposal, RiskLevel, RunState, ToolChoice, ToolId, Verdict, WorkflowProfile,
};

/// Merge confidence a critic review must reach before `resolve` may run.
pub const MIN_MERGE_CONFIDENCE: f64 = 0.5;

/// Rules in precedence order.
pub const RULES: [GateRule; 6] = [
    GateRule::MandatoryIncomplete,
    GateRule::HighRiskSecurityScan,
    GateRule::ValidateBeforeChange,
    GateRule::AnalyseBeforeApply,
    GateRule::ValidateBeforeResolve,
    GateRule::LowMergeConfidence,
];

/// Evaluate a proposal. Anything no rule catches is allowed, including skips
/// of optional tools and early completion once the mandatory set is done.
pub fn evaluate_safety_gate(
    state: &RunState,
    profile: &WorkflowProfile,
    proposal: &Proposal,
) -> Verdict {
    RULES
        .iter()
        .find_map(|rule| check_rule(*rule, state, profile, proposal))
        .unwrap_or(Verdict::Allow)
}

fn check_rule(
    rule: GateRule,
    state: &RunState,
    profile: &WorkflowProfile,
    proposal: &Proposal,
) -> Option<Verdict> {
    let override_to = |tool: ToolId, reason: String| {
        Some(Verdict::Override { tool, rule, reason })
    };

    match rule {
        GateRule::MandatoryIncomplete => {
            if !proposal.choice.is_complete() {
                return None;
            }
            let missing = state.missing_mandatory(&profile.policy);
            (!missing.is_empty()).then_some(Verdict::BlockComplete { missing })
        }

        GateRule::HighRiskSecurityScan => {
            if profile.risk_level != RiskLevel::High || state.has_completed(ToolId::SecurityScan) {
                return None;
            }
            let bypasses = proposal.skips(ToolId::SecurityScan)
                || proposal.runs(ToolId::Resolve)
                || proposal.choice.is_complete();
            bypasses.then(|| {
                Verdict::Override {
                    tool: ToolId::SecurityScan,
                    rule,
                    reason: format!(
                        "security_scan is required at HIGH risk before {}",
                        describe(proposal)
                    ),
                }
            })
        }

        GateRule::ValidateBeforeChange => {
            let changes = proposal.runs(ToolId::Fix) || proposal.runs(ToolId::Optimise);
            if changes && !state.has_completed(ToolId::Validate) {
                return override_to(
                    ToolId::Validate,
                    format!("validate must succeed before {}", describe(proposal)),
                );
            }
            None
        }

        GateRule::AnalyseBeforeApply => {
            if proposal.runs(ToolId::Fix) && !state.has_completed(ToolId::Optimise) {
                return override_to(
                    ToolId::Optimise,
                    "fix needs a completed optimise analysis".to_string(),
                );
            }
            None
        }

        GateRule::ValidateBeforeResolve => {
            if proposal.runs(ToolId::Resolve) && !state.has_completed(ToolId::Validate) {
                return override_to(
                    ToolId::Validate,
                    "resolve needs a successful validation".to_string(),
                );
            }
            None
        }

        GateRule::LowMergeConfidence => {
            if !proposal.runs(ToolId::Resolve) {
                return None;
            }
            match state.latest_merge_confidence() {
                Some(merge) if merge >= MIN_MERGE_CONFIDENCE => None,
                Some(merge) => override_to(
                    ToolId::Critic,
                    format!("merge confidence {merge:.2} below {MIN_MERGE_CONFIDENCE:.2}"),
                ),
                None => override_to(ToolId::Critic, "resolve needs a critic review".to_string()),
            }
        }
    }
}

fn describe(proposal: &Proposal) -> String {
    match (proposal.choice, proposal.action) {
        (ToolChoice::Complete, _) => "complete".to_string(),
        (ToolChoice::Tool(tool), Action::Run) => tool.to_string(),
        (ToolChoice::Tool(tool), Action::Skip) => format!("skipping {tool}"),
    }
}
