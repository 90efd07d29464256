//! Observation step of the run loop.
//!
//! The [`Observer`] answers a recorded decision: it appends the resolution to
//! the history, folds it into the state and decides whether the run is done.

use std::sync::Arc;

use crate::domain::{
    EntryKind, FailureCause, HistoryEntry, Resolution, ReviewType, RunHistory, RunState, ToolId,
    WorkflowProfile,
};
use crate::scoring::{complete_review, ScoreFunction};

/// Why the loop stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Failed(FailureCause),
}

/// What one observation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// The appended `decision_resolved` entry.
    pub entry: HistoryEntry,
    pub termination: Option<Termination>,
}

pub struct Observer {
    cap: u32,
    scoring: Arc<dyn ScoreFunction>,
    default_quality: f64,
}

impl Observer {
    pub fn new(cap: u32, scoring: Arc<dyn ScoreFunction>, default_quality: f64) -> Self {
        Self {
            cap,
            scoring,
            default_quality,
        }
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Resolve decision `decision_seq`, fold it and recompute `done`.
    pub fn observe(
        &self,
        state: &mut RunState,
        history: &mut RunHistory,
        profile: &WorkflowProfile,
        decision_seq: u64,
        mut resolution: Resolution,
    ) -> Observation {
        if let Resolution::Executed { result } = &mut resolution {
            if result.tool == ToolId::Critic {
                if let Some(review) = result
                    .output
                    .as_mut()
                    .and_then(|o| o.review.as_mut())
                    .filter(|r| r.review_type == ReviewType::Critic)
                {
                    complete_review(review, self.scoring.as_ref(), self.default_quality);
                }
            }
        }

        let entry = history
            .append(EntryKind::DecisionResolved {
                decision_seq,
                resolution,
            })
            .clone();
        state.apply(&entry);

        let termination = match &entry.entry {
            EntryKind::DecisionResolved { resolution, .. } => {
                self.termination(state, profile, resolution)
            }
            _ => None,
        };
        Observation { entry, termination }
    }

    /// `done` after the latest resolution.
    pub fn termination(
        &self,
        state: &RunState,
        profile: &WorkflowProfile,
        latest: &Resolution,
    ) -> Option<Termination> {
        match latest {
            Resolution::Completed => return Some(Termination::Completed),
            Resolution::Executed { result }
                if !result.success && profile.policy.is_mandatory(result.tool) =>
            {
                return Some(Termination::Failed(FailureCause::MandatoryToolFailed {
                    tool: result.tool,
                    error: result.error.clone().unwrap_or_else(|| "unknown error".into()),
                }));
            }
            _ => {}
        }
        (state.iteration > self.cap)
            .then_some(Termination::Failed(FailureCause::IterationCapExceeded { cap: self.cap }))
    }
}
