//! Process-wide atomic counters.
//!
//! Counters are bumped silently where things happen. [`Metrics::flush`]
//! emits all of them as one `tracing::info!` event, typically when a run
//! finishes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    decisions_recorded: AtomicU64,
    gate_overrides: AtomicU64,
    completions_blocked: AtomicU64,
    planner_fallbacks: AtomicU64,
    tool_failures: AtomicU64,
    tool_retries: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub decisions_recorded: u64,
    pub gate_overrides: u64,
    pub completions_blocked: u64,
    pub planner_fallbacks: u64,
    pub tool_failures: u64,
    pub tool_retries: u64,
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            decisions_recorded: AtomicU64::new(0),
            gate_overrides: AtomicU64::new(0),
            completions_blocked: AtomicU64::new(0),
            planner_fallbacks: AtomicU64::new(0),
            tool_failures: AtomicU64::new(0),
            tool_retries: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        bump(&self.runs_started, "runs_started");
    }

    pub fn inc_runs_completed(&self) {
        bump(&self.runs_completed, "runs_completed");
    }

    pub fn inc_runs_failed(&self) {
        bump(&self.runs_failed, "runs_failed");
    }

    pub fn inc_decisions(&self) {
        bump(&self.decisions_recorded, "decisions_recorded");
    }

    pub fn inc_gate_overrides(&self) {
        bump(&self.gate_overrides, "gate_overrides");
    }

    pub fn inc_completions_blocked(&self) {
        bump(&self.completions_blocked, "completions_blocked");
    }

    pub fn inc_planner_fallbacks(&self) {
        bump(&self.planner_fallbacks, "planner_fallbacks");
    }

    pub fn inc_tool_failures(&self) {
        bump(&self.tool_failures, "tool_failures");
    }

    pub fn inc_tool_retries(&self) {
        bump(&self.tool_retries, "tool_retries");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            runs_started: load(&self.runs_started),
            runs_completed: load(&self.runs_completed),
            runs_failed: load(&self.runs_failed),
            decisions_recorded: load(&self.decisions_recorded),
            gate_overrides: load(&self.gate_overrides),
            completions_blocked: load(&self.completions_blocked),
            planner_fallbacks: load(&self.planner_fallbacks),
            tool_failures: load(&self.tool_failures),
            tool_retries: load(&self.tool_retries),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            runs_started = s.runs_started,
            runs_completed = s.runs_completed,
            runs_failed = s.runs_failed,
            decisions_recorded = s.decisions_recorded,
            gate_overrides = s.gate_overrides,
            completions_blocked = s.completions_blocked,
            planner_fallbacks = s.planner_fallbacks,
            tool_failures = s.tool_failures,
            tool_retries = s.tool_retries,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for c in [
            &self.runs_started,
            &self.runs_completed,
            &self.runs_failed,
            &self.decisions_recorded,
            &self.gate_overrides,
            &self.completions_blocked,
            &self.planner_fallbacks,
            &self.tool_failures,
            &self.tool_retries,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
