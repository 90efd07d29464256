//! Append-only run history.
//!
//! The history is an arena of immutable entries addressed by a 1-based
//! sequence number. Every `DecisionRecorded` entry is later answered by
//! exactly one `DecisionResolved` entry naming its sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::Decision;
use super::error::{PipewardenError, Result};
use super::outcome::ActionResult;
use super::profile::WorkflowProfile;

/// How a recorded decision was answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// The tool ran; exactly one result per executed decision.
    Executed { result: ActionResult },
    /// Explicit skip marker: nothing ran.
    Skipped { reason: String },
    /// A `complete` proposal was rejected by the gate.
    Blocked { reason: String },
    /// A `complete` proposal was accepted.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    ProfileAssigned { profile: WorkflowProfile },
    DecisionRecorded { decision: Decision },
    DecisionResolved { decision_seq: u64, resolution: Resolution },
    /// A logged, state-advancing irregularity (e.g. planner fallback).
    Anomaly { message: String },
}

impl EntryKind {
    pub fn kind_str(&self) -> &'static str {
        match self {
            EntryKind::ProfileAssigned { .. } => "profile_assigned",
            EntryKind::DecisionRecorded { .. } => "decision_recorded",
            EntryKind::DecisionResolved { .. } => "decision_resolved",
            EntryKind::Anomaly { .. } => "anomaly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub entry: EntryKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    entries: Vec<HistoryEntry>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries; sequence numbers must be 1..=n.
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Result<Self> {
        for (i, e) in entries.iter().enumerate() {
            let expected = i as u64 + 1;
            if e.seq != expected {
                return Err(PipewardenError::CorruptHistory(format!(
                    "expected seq {expected}, found {}",
                    e.seq
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Append a new entry and return it.
    pub fn append(&mut self, entry: EntryKind) -> &HistoryEntry {
        let seq = self.entries.len() as u64 + 1;
        self.entries.push(HistoryEntry {
            seq,
            recorded_at: Utc::now(),
            entry,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, seq: u64) -> Option<&HistoryEntry> {
        seq.checked_sub(1)
            .and_then(|i| self.entries.get(i as usize))
    }

    pub fn profile(&self) -> Option<&WorkflowProfile> {
        self.entries.iter().find_map(|e| match &e.entry {
            EntryKind::ProfileAssigned { profile } => Some(profile),
            _ => None,
        })
    }

    /// Recorded decisions with their sequence numbers, in order.
    pub fn decisions(&self) -> impl Iterator<Item = (u64, &Decision)> {
        self.entries.iter().filter_map(|e| match &e.entry {
            EntryKind::DecisionRecorded { decision } => Some((e.seq, decision)),
            _ => None,
        })
    }

    /// Resolutions with the sequence number of the decision they answer.
    pub fn resolutions(&self) -> impl Iterator<Item = (u64, &Resolution)> {
        self.entries.iter().filter_map(|e| match &e.entry {
            EntryKind::DecisionResolved {
                decision_seq,
                resolution,
            } => Some((*decision_seq, resolution)),
            _ => None,
        })
    }

    /// Executed action results, in execution order.
    pub fn action_results(&self) -> impl Iterator<Item = &ActionResult> {
        self.resolutions().filter_map(|(_, r)| match r {
            Resolution::Executed { result } => Some(result),
            _ => None,
        })
    }

    /// Decisions that have no resolution yet.
    pub fn unresolved_decisions(&self) -> Vec<(u64, &Decision)> {
        let resolved: std::collections::BTreeSet<u64> =
            self.resolutions().map(|(seq, _)| seq).collect();
        self.decisions()
            .filter(|(seq, _)| !resolved.contains(seq))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{PlannerKind, Proposal, Verdict};
    use crate::domain::tool::ToolId;

    fn decision(tool: ToolId) -> Decision {
        Decision {
            proposal: Proposal::run(tool, "next", 1.0),
            planner: PlannerKind::RuleBased,
            verdict: Verdict::Allow,
        }
    }

    #[test]
    fn test_append_assigns_contiguous_sequence() {
        let mut h = RunHistory::new();
        assert_eq!(h.append(EntryKind::Anomaly { message: "a".into() }).seq, 1);
        assert_eq!(
            h.append(EntryKind::DecisionRecorded {
                decision: decision(ToolId::Ingest)
            })
            .seq,
            2
        );
        assert_eq!(h.get(2).map(|e| e.entry.kind_str()), Some("decision_recorded"));
        assert!(h.get(0).is_none());
        assert!(h.get(3).is_none());
    }

    #[test]
    fn test_unresolved_decisions() {
        let mut h = RunHistory::new();
        h.append(EntryKind::DecisionRecorded {
            decision: decision(ToolId::Ingest),
        });
        h.append(EntryKind::DecisionResolved {
            decision_seq: 1,
            resolution: Resolution::Skipped {
                reason: "test".into(),
            },
        });
        h.append(EntryKind::DecisionRecorded {
            decision: decision(ToolId::Validate),
        });

        let open = h.unresolved_decisions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].0, 3);
    }

    #[test]
    fn test_from_entries_rejects_gaps() {
        let mut h = RunHistory::new();
        h.append(EntryKind::Anomaly { message: "a".into() });
        h.append(EntryKind::Anomaly { message: "b".into() });
        let mut entries = h.entries().to_vec();
        entries.remove(0);
        assert!(matches!(
            RunHistory::from_entries(entries),
            Err(PipewardenError::CorruptHistory(_))
        ));
    }

    #[test]
    fn test_entry_kind_tag_matches_kind_str() {
        let kind = EntryKind::Anomaly {
            message: "planner fell back".into(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], kind.kind_str());
    }
}
