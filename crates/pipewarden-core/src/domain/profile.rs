//! Workflow profile: classification of a run and its execution policy.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::tool::ToolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowType {
    Ci,
    Cd,
    Release,
    Scheduled,
}

impl WorkflowType {
    /// Higher wins when several trigger shapes match.
    pub fn specificity(&self) -> u8 {
        match self {
            WorkflowType::Release => 4,
            WorkflowType::Cd => 3,
            WorkflowType::Ci => 2,
            WorkflowType::Scheduled => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeScope {
    DocsOnly,
    Code,
    Infrastructure,
    Deployment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Combine with a newly observed level. Never lowers the risk.
    pub fn escalate(self, observed: RiskLevel) -> RiskLevel {
        self.max(observed)
    }
}

/// Role a tool plays in a run's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRole {
    Mandatory,
    Optional,
    Recommended,
}

/// Mandatory / optional / recommended tool lists, each in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub mandatory: Vec<ToolId>,
    pub optional: Vec<ToolId>,
    pub recommended: Vec<ToolId>,
}

impl ExecutionPolicy {
    /// The fixed policy table keyed by risk level.
    pub fn for_risk(risk: RiskLevel) -> Self {
        let optional = match risk {
            RiskLevel::High => vec![ToolId::RiskAssess, ToolId::SecurityScan],
            RiskLevel::Medium => vec![ToolId::SecurityScan],
            RiskLevel::Low => Vec::new(),
        };
        Self {
            mandatory: vec![ToolId::Ingest, ToolId::Validate],
            optional,
            recommended: vec![ToolId::Optimise, ToolId::Fix, ToolId::Critic, ToolId::Resolve],
        }
    }

    pub fn role_of(&self, tool: ToolId) -> Option<PolicyRole> {
        if self.mandatory.contains(&tool) {
            Some(PolicyRole::Mandatory)
        } else if self.optional.contains(&tool) {
            Some(PolicyRole::Optional)
        } else if self.recommended.contains(&tool) {
            Some(PolicyRole::Recommended)
        } else {
            None
        }
    }

    pub fn contains(&self, tool: ToolId) -> bool {
        self.role_of(tool).is_some()
    }

    pub fn is_mandatory(&self, tool: ToolId) -> bool {
        self.role_of(tool) == Some(PolicyRole::Mandatory)
    }

    /// mandatory ∪ optional ∪ recommended
    pub fn tools(&self) -> BTreeSet<ToolId> {
        self.mandatory
            .iter()
            .chain(&self.optional)
            .chain(&self.recommended)
            .copied()
            .collect()
    }
}

/// Classification of one run plus the policy derived from it. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowProfile {
    pub workflow_type: WorkflowType,
    pub change_scope: ChangeScope,
    pub risk_level: RiskLevel,
    pub policy: ExecutionPolicy,
    /// Markers that drove the classification, for audit.
    #[serde(default)]
    pub markers: Vec<String>,
}

impl WorkflowProfile {
    pub fn new(workflow_type: WorkflowType, change_scope: ChangeScope, risk_level: RiskLevel) -> Self {
        Self {
            workflow_type,
            change_scope,
            risk_level,
            policy: ExecutionPolicy::for_risk(risk_level),
            markers: Vec::new(),
        }
    }

    /// Upper bound on decisions for this run.
    pub fn iteration_cap(&self, margin: u32) -> u32 {
        self.policy.tools().len() as u32 + margin
    }
}
