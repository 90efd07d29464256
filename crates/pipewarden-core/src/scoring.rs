//! Critic scoring contract.
//!
//! A [`ScoreFunction`] turns a base confidence and penalty counts into one
//! scalar. The observer uses it to complete critic reviews that report a
//! quality score but no merge confidence.

use serde::{Deserialize, Serialize};

use crate::domain::Review;

/// Counts that lower a score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PenaltyInputs {
    pub regressions: u32,
    pub unresolved: u32,
}

pub trait ScoreFunction: Send + Sync {
    /// Result is in [0, 1].
    fn score(&self, base: f64, penalties: &PenaltyInputs) -> f64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Quality assumed when a critic reports none (0-10 scale).
    pub default_quality_score: f64,
    pub regression_penalty: f64,
    pub unresolved_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_quality_score: 7.0,
            regression_penalty: 0.05,
            unresolved_penalty: 0.02,
        }
    }
}

/// `base - regression_penalty * regressions - unresolved_penalty * unresolved`, clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearPenaltyScore {
    pub regression_penalty: f64,
    pub unresolved_penalty: f64,
}

impl From<&ScoringConfig> for LinearPenaltyScore {
    fn from(cfg: &ScoringConfig) -> Self {
        Self {
            regression_penalty: cfg.regression_penalty,
            unresolved_penalty: cfg.unresolved_penalty,
        }
    }
}

impl Default for LinearPenaltyScore {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl ScoreFunction for LinearPenaltyScore {
    fn score(&self, base: f64, penalties: &PenaltyInputs) -> f64 {
        let penalty = self.regression_penalty * f64::from(penalties.regressions)
            + self.unresolved_penalty * f64::from(penalties.unresolved);
        (base - penalty).clamp(0.0, 1.0)
    }
}

/// Map a 0-10 quality score onto [0, 1].
pub fn fix_confidence(quality_score: f64) -> f64 {
    (quality_score / 10.0).clamp(0.0, 1.0)
}

/// Penalty counts read from a critic's detail payload
/// (`regressions` and `unresolved_issues` arrays).
pub fn penalties_from_detail(detail: &serde_json::Value) -> PenaltyInputs {
    let count = |key: &str| {
        detail
            .get(key)
            .and_then(|v| v.as_array())
            .map_or(0, |a| a.len() as u32)
    };
    PenaltyInputs {
        regressions: count("regressions"),
        unresolved: count("unresolved_issues"),
    }
}

/// Fill in missing fix/merge confidence on a review.
pub fn complete_review(review: &mut Review, scoring: &dyn ScoreFunction, default_quality: f64) {
    if review.merge_confidence.is_some() {
        return;
    }
    let quality = review.quality_score.unwrap_or(default_quality);
    let fix = *review
        .fix_confidence
        .get_or_insert_with(|| fix_confidence(quality));
    review.merge_confidence = Some(scoring.score(fix, &penalties_from_detail(&review.detail)));
}
