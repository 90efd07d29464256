//! Planner proposals, safety-gate verdicts, and recorded decisions.

use serde::{Deserialize, Serialize};

use super::tool::{ToolChoice, ToolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Run,
    Skip,
}

/// Which planner produced a proposal. Gate and observer never branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    Reasoning,
    RuleBased,
    /// Rule-based substitute after the reasoning backend failed.
    Fallback,
}

/// A planner's suggestion before the safety gate has seen it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub choice: ToolChoice,
    pub action: Action,
    pub rationale: String,
    /// In [0, 1].
    pub confidence: f64,
}

impl Proposal {
    pub fn run(tool: ToolId, rationale: impl Into<String>, confidence: f64) -> Self {
        Self {
            choice: ToolChoice::Tool(tool),
            action: Action::Run,
            rationale: rationale.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn skip(tool: ToolId, rationale: impl Into<String>, confidence: f64) -> Self {
        Self {
            action: Action::Skip,
            ..Self::run(tool, rationale, confidence)
        }
    }

    pub fn complete(rationale: impl Into<String>, confidence: f64) -> Self {
        Self {
            choice: ToolChoice::Complete,
            action: Action::Run,
            rationale: rationale.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// The proposal would invoke `tool`.
    pub fn runs(&self, tool: ToolId) -> bool {
        self.action == Action::Run && self.choice.is(tool)
    }

    pub fn skips(&self, tool: ToolId) -> bool {
        self.action == Action::Skip && self.choice.is(tool)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Safety rule that produced a non-ALLOW verdict, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    MandatoryIncomplete,
    HighRiskSecurityScan,
    ValidateBeforeChange,
    AnalyseBeforeApply,
    ValidateBeforeResolve,
    LowMergeConfidence,
}

/// The safety gate's verdict on a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    /// The proposal is replaced by running `tool`.
    Override {
        tool: ToolId,
        rule: GateRule,
        reason: String,
    },
    /// A `complete` proposal is rejected; the loop must propose again.
    BlockComplete { missing: Vec<ToolId> },
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Override { .. } => "override",
            Verdict::BlockComplete { .. } => "block_complete",
        }
    }
}

/// What actually happens once a verdict is applied to a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Run(ToolId),
    Skip(ToolId),
    Complete,
    Blocked,
}

/// One recorded planner proposal together with its final verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub proposal: Proposal,
    pub planner: PlannerKind,
    pub verdict: Verdict,
}

impl Decision {
    pub fn effect(&self) -> Effect {
        match &self.verdict {
            Verdict::Override { tool, .. } => Effect::Run(*tool),
            Verdict::BlockComplete { .. } => Effect::Blocked,
            Verdict::Allow => match (self.proposal.choice, self.proposal.action) {
                (ToolChoice::Complete, _) => Effect::Complete,
                (ToolChoice::Tool(t), Action::Run) => Effect::Run(t),
                (ToolChoice::Tool(t), Action::Skip) => Effect::Skip(t),
            },
        }
    }

    /// Tool this decision is about after the verdict (None for `complete`).
    pub fn effective_tool(&self) -> Option<ToolId> {
        match self.effect() {
            Effect::Run(t) | Effect::Skip(t) => Some(t),
            Effect::Complete | Effect::Blocked => None,
        }
    }
}
