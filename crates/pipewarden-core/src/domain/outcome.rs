//! Tool outputs: issues, reviews, and the per-invocation action result.

use serde::{Deserialize, Serialize};

use super::tool::ToolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A detected pipeline problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

impl Issue {
    pub fn new(kind: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            severity,
            location: None,
            suggested_fix: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    pub fn has_suggested_fix(&self) -> bool {
        self.suggested_fix.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    Critic,
    Risk,
    Security,
}

/// A scored assessment from a gating tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_type: ReviewType,
    #[serde(default)]
    pub fix_confidence: Option<f64>,
    #[serde(default)]
    pub merge_confidence: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub overall_risk: Option<String>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl Review {
    pub fn new(review_type: ReviewType) -> Self {
        Self {
            review_type,
            fix_confidence: None,
            merge_confidence: None,
            quality_score: None,
            risk_score: None,
            overall_risk: None,
            detail: serde_json::Value::Null,
        }
    }

    /// Critic review with an explicit merge confidence.
    pub fn critic(merge_confidence: f64) -> Self {
        Self {
            merge_confidence: Some(merge_confidence),
            ..Self::new(ReviewType::Critic)
        }
    }
}

/// What an adapter hands back on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default)]
    pub artifact: serde_json::Value,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub review: Option<Review>,
}

impl ToolOutput {
    pub fn artifact(artifact: serde_json::Value) -> Self {
        Self {
            artifact,
            ..Self::default()
        }
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    pub fn with_review(mut self, review: Review) -> Self {
        self.review = Some(review);
        self
    }
}

/// Outcome of one executor invocation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub tool: ToolId,
    pub success: bool,
    pub duration_ms: u64,
    /// Attempts made (1 = no retries used).
    pub attempts: u32,
    /// The final attempt hit the deadline.
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub output: Option<ToolOutput>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionResult {
    /// PR reference reported by a successful resolve.
    pub fn pr_reference(&self) -> Option<&str> {
        if self.tool != ToolId::Resolve || !self.success {
            return None;
        }
        self.output
            .as_ref()
            .and_then(|o| o.artifact.get("pr_reference"))
            .and_then(|v| v.as_str())
    }
}
