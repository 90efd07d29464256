//! `RunState`: the working memory of one run, folded from its history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::decision::Decision;
use super::history::{EntryKind, HistoryEntry, Resolution};
use super::outcome::{ActionResult, Issue, Review, ReviewType};
use super::profile::ExecutionPolicy;
use super::run::RunStage;
use super::tool::ToolId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTool {
    pub tool: ToolId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub tool: ToolId,
    pub error: String,
    pub timed_out: bool,
}

/// Projection of a run's history.
///
/// `completed` holds exactly the tools whose decision ran and whose result
/// succeeded, in execution order; `validate` may appear more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub stage: RunStage,
    /// Number of recorded decisions.
    pub iteration: u32,
    pub completed: Vec<ToolId>,
    pub failures: Vec<ToolFailure>,
    pub skipped: Vec<SkippedTool>,
    /// Latest artifact produced by each tool.
    pub artifacts: BTreeMap<ToolId, serde_json::Value>,
    pub issues: Vec<Issue>,
    pub reviews: Vec<Review>,
    /// Free-form context for the planner.
    pub notes: Vec<String>,
    mandatory: Vec<ToolId>,
    open: BTreeMap<u64, Decision>,
    last_validate_seq: Option<u64>,
    last_change_seq: Option<u64>,
    last_critic_seq: Option<u64>,
    /// `issues[..fix_watermark]` were present when the last fix ran.
    fix_watermark: usize,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            stage: RunStage::Classifying,
            iteration: 0,
            completed: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            artifacts: BTreeMap::new(),
            issues: Vec::new(),
            reviews: Vec::new(),
            notes: Vec::new(),
            mandatory: Vec::new(),
            open: BTreeMap::new(),
            last_validate_seq: None,
            last_change_seq: None,
            last_critic_seq: None,
            fix_watermark: 0,
        }
    }
}

impl RunState {
    /// Recompute the projection from scratch.
    pub fn replay(entries: &[HistoryEntry]) -> Self {
        let mut state = Self::default();
        for entry in entries {
            state.apply(entry);
        }
        state
    }

    /// Fold one history entry into the state.
    pub fn apply(&mut self, entry: &HistoryEntry) {
        match &entry.entry {
            EntryKind::ProfileAssigned { profile } => {
                self.mandatory = profile.policy.mandatory.clone();
            }
            EntryKind::DecisionRecorded { decision } => {
                self.iteration += 1;
                self.open.insert(entry.seq, decision.clone());
            }
            EntryKind::DecisionResolved {
                decision_seq,
                resolution,
            } => {
                let decision = self.open.remove(decision_seq);
                match resolution {
                    Resolution::Executed { result } => self.merge_result(entry.seq, result),
                    Resolution::Skipped { reason } => {
                        if let Some(tool) = decision.and_then(|d| d.effective_tool()) {
                            self.skipped.push(SkippedTool {
                                tool,
                                reason: reason.clone(),
                            });
                        }
                    }
                    Resolution::Blocked { reason } => {
                        self.notes.push(format!("completion blocked: {reason}"));
                    }
                    Resolution::Completed => {}
                }
            }
            EntryKind::Anomaly { message } => self.notes.push(message.clone()),
        }
    }

    fn merge_result(&mut self, seq: u64, result: &ActionResult) {
        let tool = result.tool;
        if !result.success {
            if result.timed_out && !self.mandatory.contains(&tool) {
                self.skipped.push(SkippedTool {
                    tool,
                    reason: format!("timed out after {} attempt(s)", result.attempts),
                });
            } else {
                let error = result.error.clone().unwrap_or_else(|| "unknown error".into());
                self.notes.push(format!("{tool} failed: {error}"));
                self.failures.push(ToolFailure {
                    tool,
                    error,
                    timed_out: result.timed_out,
                });
            }
            return;
        }

        self.completed.push(tool);
        if tool == ToolId::Fix {
            self.fix_watermark = self.issues.len();
        }
        if let Some(output) = &result.output {
            if !output.artifact.is_null() {
                self.artifacts.insert(tool, output.artifact.clone());
            }
            self.issues.extend(output.issues.iter().cloned());
            if let Some(review) = &output.review {
                self.reviews.push(review.clone());
            }
        }
        match tool {
            ToolId::Validate => self.last_validate_seq = Some(seq),
            ToolId::Optimise | ToolId::Fix => self.last_change_seq = Some(seq),
            ToolId::Critic => self.last_critic_seq = Some(seq),
            _ => {}
        }
    }

    // -- queries -------------------------------------------------------------

    pub fn has_completed(&self, tool: ToolId) -> bool {
        self.completed.contains(&tool)
    }

    pub fn completed_count(&self, tool: ToolId) -> usize {
        self.completed.iter().filter(|t| **t == tool).count()
    }

    pub fn has_failed(&self, tool: ToolId) -> bool {
        self.failures.iter().any(|f| f.tool == tool)
    }

    pub fn was_skipped(&self, tool: ToolId) -> bool {
        self.skipped.iter().any(|s| s.tool == tool)
    }

    /// Tried and did not succeed (failed or skipped).
    pub fn gave_up_on(&self, tool: ToolId) -> bool {
        self.has_failed(tool) || self.was_skipped(tool)
    }

    /// Mandatory tools not yet completed, in declared order.
    pub fn missing_mandatory(&self, policy: &ExecutionPolicy) -> Vec<ToolId> {
        policy
            .mandatory
            .iter()
            .copied()
            .filter(|t| !self.has_completed(*t))
            .collect()
    }

    /// Has the candidate changed since it was first produced?
    pub fn has_candidate_change(&self) -> bool {
        self.last_change_seq.is_some()
    }

    /// A validation succeeded after the latest optimise/fix.
    pub fn validation_is_current(&self) -> bool {
        is_after(self.last_validate_seq, self.last_change_seq)
    }

    /// A critic review succeeded after the latest optimise/fix.
    pub fn critic_is_current(&self) -> bool {
        is_after(self.last_critic_seq, self.last_change_seq)
    }

    pub fn latest_review(&self, review_type: ReviewType) -> Option<&Review> {
        self.reviews
            .iter()
            .rev()
            .find(|r| r.review_type == review_type)
    }

    /// Merge confidence of the most recent critic review.
    pub fn latest_merge_confidence(&self) -> Option<f64> {
        self.latest_review(ReviewType::Critic)
            .and_then(|r| r.merge_confidence)
    }

    /// Issues with a suggested fix that no later fix has applied.
    pub fn issues_requiring_fix(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .skip(self.fix_watermark)
            .filter(|i| i.has_suggested_fix())
    }

    /// Decisions recorded but not yet resolved.
    pub fn open_decisions(&self) -> impl Iterator<Item = (u64, &Decision)> {
        self.open.iter().map(|(seq, d)| (*seq, d))
    }

    pub fn pr_reference(&self) -> Option<&str> {
        self.artifacts
            .get(&ToolId::Resolve)
            .and_then(|a| a.get("pr_reference"))
            .and_then(|v| v.as_str())
    }
}

fn is_after(event: Option<u64>, change: Option<u64>) -> bool {
    match (event, change) {
        (Some(e), Some(c)) => e > c,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
