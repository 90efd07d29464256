//! One run's control loop.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::debug;

use crate::domain::{
    Decision, Effect, EntryKind, FailureCause, HistoryEntry, PipelineMetadata, PlannerKind,
    Proposal, Resolution, Result, RunContext, RunHistory, RunStage, RunState, RunStatus, ToolId,
    Verdict, WorkflowProfile,
};
use crate::gate::evaluate_safety_gate;
use crate::metrics::METRICS;
use crate::obs;
use crate::observer::{Observer, Termination};
use crate::planner::rules::optional_condition_holds;
use crate::planner::{fallback_proposal, PlannerError, PlanningInput};
use crate::recording::RunRecorder;

use super::{Inner, RunOutcome};

const INTERRUPTED: &str = "interrupted before execution";

pub(super) struct RunLoop {
    inner: Arc<Inner>,
    ctx: RunContext,
    recorder: RunRecorder,
    cancel: watch::Receiver<bool>,
    history: RunHistory,
    state: RunState,
    profile: Option<WorkflowProfile>,
    started: Instant,
}

impl RunLoop {
    pub(super) fn new(
        inner: Arc<Inner>,
        ctx: RunContext,
        recorder: RunRecorder,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner,
            ctx,
            recorder,
            cancel,
            history: RunHistory::new(),
            state: RunState::default(),
            profile: None,
            started: Instant::now(),
        }
    }

    pub(super) async fn start(mut self, metadata: PipelineMetadata) -> RunOutcome {
        let result = match self.classify(&metadata).await {
            Ok(profile) => self.drive(profile).await,
            Err(e) => Err(e),
        };
        self.finish(result).await
    }

    pub(super) async fn resume(mut self, history: RunHistory) -> RunOutcome {
        let result = match self.restore(history).await {
            Ok(Some(profile)) => {
                let settled = self.history.resolutions().last().and_then(|(_, latest)| {
                    self.observer(&profile).termination(&self.state, &profile, latest)
                });
                match settled {
                    Some(termination) => Ok(termination),
                    None => self.drive(profile).await,
                }
            }
            Ok(None) => Ok(Termination::Failed(FailureCause::Profiling {
                detail: "run was interrupted before it was profiled".into(),
            })),
            Err(e) => Err(e),
        };
        self.finish(result).await
    }

    // -----------------------------------------------------------------------
    // CLASSIFYING
    // -----------------------------------------------------------------------

    async fn classify(&mut self, metadata: &PipelineMetadata) -> Result<WorkflowProfile> {
        self.recorder.stage(RunStage::Classifying).await?;
        let profile = self.inner.profiler.profile(metadata)?;
        obs::emit_run_profiled(&self.ctx, &profile);
        self.append(EntryKind::ProfileAssigned {
            profile: profile.clone(),
        })
        .await?;
        self.profile = Some(profile.clone());
        Ok(profile)
    }

    /// Rebuild state from a persisted history and close decisions that never
    /// got a resolution.
    async fn restore(&mut self, history: RunHistory) -> Result<Option<WorkflowProfile>> {
        self.state = RunState::replay(history.entries());
        self.history = history;
        let Some(profile) = self.history.profile().cloned() else {
            return Ok(None);
        };
        self.profile = Some(profile.clone());

        let open: Vec<u64> = self
            .history
            .unresolved_decisions()
            .into_iter()
            .map(|(seq, _)| seq)
            .collect();
        for decision_seq in open {
            debug!(run_id = %self.ctx.run_id, seq = decision_seq, "closing interrupted decision");
            self.append(EntryKind::DecisionResolved {
                decision_seq,
                resolution: Resolution::Skipped {
                    reason: INTERRUPTED.into(),
                },
            })
            .await?;
        }

        self.state.stage = if self.state.iteration > 0 {
            RunStage::Observing
        } else {
            RunStage::Classifying
        };
        Ok(Some(profile))
    }

    // -----------------------------------------------------------------------
    // THINK → GATE → ACT → OBSERVE
    // -----------------------------------------------------------------------

    async fn drive(&mut self, profile: WorkflowProfile) -> Result<Termination> {
        let observer = self.observer(&profile);
        loop {
            if *self.cancel.borrow() {
                return Ok(Termination::Failed(FailureCause::Cancelled));
            }

            self.advance(RunStage::Thinking).await?;
            let (proposal, planner) = self.think(&profile).await?;

            self.advance(RunStage::Gating).await?;
            let primary = self.gate(&profile, proposal, planner).await?;
            let mut pending = vec![primary];
            if let Some(companion) = self.companion(&profile, &pending[0].1).await? {
                pending.push(companion);
            }

            if pending
                .iter()
                .any(|(_, d)| matches!(d.effect(), Effect::Run(_)))
            {
                self.advance(RunStage::Acting).await?;
            }
            let resolutions = join_all(pending.iter().map(|(_, d)| self.resolve(d))).await;

            self.advance(RunStage::Observing).await?;
            let mut termination = None;
            for ((seq, _), resolution) in pending.iter().zip(resolutions) {
                if let Resolution::Executed { result } = &resolution {
                    obs::emit_action_executed(
                        &self.ctx,
                        result.tool.as_str(),
                        result.success,
                        result.attempts,
                        result.duration_ms,
                    );
                    if !result.success {
                        METRICS.inc_tool_failures();
                    }
                }
                let observation = observer.observe(
                    &mut self.state,
                    &mut self.history,
                    &profile,
                    *seq,
                    resolution,
                );
                self.recorder.record(&observation.entry).await?;
                termination = termination.or(observation.termination);
            }

            if let Some(termination) = termination {
                return Ok(termination);
            }
        }
    }

    /// Ask the planner; on any planner failure fall back to the rule order.
    async fn think(&mut self, profile: &WorkflowProfile) -> Result<(Proposal, PlannerKind)> {
        let planner = self.inner.planner.clone();
        let timeout = self.inner.config.planner_timeout();
        let input = PlanningInput {
            state: &self.state,
            profile,
            history: &self.history,
            catalog: &self.inner.catalog,
        };
        let outcome = match tokio::time::timeout(timeout, planner.propose(&self.ctx, input)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(PlannerError::Timeout {
                timeout_ms: self.inner.config.planner_timeout_ms,
            }),
        };

        match outcome {
            Ok(proposal) => Ok((proposal, planner.kind())),
            Err(err) => {
                obs::emit_planner_anomaly(&self.ctx, &err);
                METRICS.inc_planner_fallbacks();
                self.append(EntryKind::Anomaly {
                    message: format!("{:?} planner failed: {err}", planner.kind()),
                })
                .await?;
                Ok((fallback_proposal(&self.state, profile), PlannerKind::Fallback))
            }
        }
    }

    async fn gate(
        &mut self,
        profile: &WorkflowProfile,
        proposal: Proposal,
        planner: PlannerKind,
    ) -> Result<(u64, Decision)> {
        let verdict = evaluate_safety_gate(&self.state, profile, &proposal);
        self.record_decision(Decision {
            proposal,
            planner,
            verdict,
        })
        .await
    }

    /// With `parallel_optional`, pair an optional tool with the other optional
    /// tool when that one is also due and the gate lets it through unchanged.
    async fn companion(
        &mut self,
        profile: &WorkflowProfile,
        primary: &Decision,
    ) -> Result<Option<(u64, Decision)>> {
        if !self.inner.config.parallel_optional {
            return Ok(None);
        }
        let Effect::Run(tool) = primary.effect() else {
            return Ok(None);
        };
        if !profile.policy.optional.contains(&tool) {
            return Ok(None);
        }

        let candidate = profile.policy.optional.iter().copied().find(|other| {
            *other != tool
                && self.inner.catalog.contains(*other)
                && !self.state.has_completed(*other)
                && !self.state.gave_up_on(*other)
                && optional_condition_holds(*other, profile)
        });
        let Some(other) = candidate else {
            return Ok(None);
        };

        let proposal = Proposal::run(other, format!("dispatched alongside {tool}"), 0.9);
        if evaluate_safety_gate(&self.state, profile, &proposal) != Verdict::Allow {
            return Ok(None);
        }
        self.record_decision(Decision {
            proposal,
            planner: PlannerKind::RuleBased,
            verdict: Verdict::Allow,
        })
        .await
        .map(Some)
    }

    async fn record_decision(&mut self, decision: Decision) -> Result<(u64, Decision)> {
        match &decision.verdict {
            Verdict::Allow => {}
            Verdict::Override { .. } => METRICS.inc_gate_overrides(),
            Verdict::BlockComplete { .. } => METRICS.inc_completions_blocked(),
        }
        METRICS.inc_decisions();
        let entry = self
            .append(EntryKind::DecisionRecorded {
                decision: decision.clone(),
            })
            .await?;
        obs::emit_decision_gated(&self.ctx, entry.seq, &decision);
        Ok((entry.seq, decision))
    }

    async fn resolve(&self, decision: &Decision) -> Resolution {
        match decision.effect() {
            Effect::Run(tool) => Resolution::Executed {
                result: self.inner.executor.execute(&self.ctx, tool, &self.state).await,
            },
            Effect::Skip(_) => Resolution::Skipped {
                reason: decision.proposal.rationale.clone(),
            },
            Effect::Blocked => {
                let missing = match &decision.verdict {
                    Verdict::BlockComplete { missing } => missing
                        .iter()
                        .map(ToolId::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                    _ => String::new(),
                };
                Resolution::Blocked {
                    reason: format!("mandatory tools missing: {missing}"),
                }
            }
            Effect::Complete => Resolution::Completed,
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn observer(&self, profile: &WorkflowProfile) -> Observer {
        Observer::new(
            profile.iteration_cap(self.inner.config.iteration_margin),
            self.inner.scoring.clone(),
            self.inner.config.scoring.default_quality_score,
        )
    }

    async fn advance(&mut self, next: RunStage) -> Result<()> {
        self.state.stage = self.state.stage.transition(next)?;
        self.recorder.stage(next).await
    }

    async fn append(&mut self, kind: EntryKind) -> Result<HistoryEntry> {
        let entry = self.history.append(kind).clone();
        self.state.apply(&entry);
        self.recorder.record(&entry).await?;
        Ok(entry)
    }

    async fn finish(mut self, result: Result<Termination>) -> RunOutcome {
        // Any failed store write makes the trail untrustworthy; the outcome
        // then carries no history.
        let mut discard = false;
        let termination = match result {
            Ok(Termination::Completed) => match self.recorder.finish_ok().await {
                Ok(()) => Termination::Completed,
                Err(e) => {
                    discard = true;
                    Termination::Failed(FailureCause::from(&e))
                }
            },
            Ok(failed) => failed,
            Err(e) => {
                let cause = FailureCause::from(&e);
                discard = matches!(cause, FailureCause::StoreWriteFailure { .. });
                Termination::Failed(cause)
            }
        };

        let cause = match termination {
            Termination::Completed => None,
            Termination::Failed(cause) => {
                if self.recorder.finish_err(&cause).await.is_err() {
                    discard = true;
                }
                Some(cause)
            }
        };

        let (status, stage) = match cause {
            None => (RunStatus::Completed, RunStage::Completed),
            Some(_) => (RunStatus::Failed, RunStage::Failed),
        };
        self.state.stage = stage;
        match status {
            RunStatus::Completed => METRICS.inc_runs_completed(),
            _ => METRICS.inc_runs_failed(),
        }
        obs::emit_run_finished(
            &self.ctx,
            self.started.elapsed().as_millis() as u64,
            self.state.iteration,
            cause.as_ref(),
        );
        METRICS.flush();

        RunOutcome {
            run_id: self.ctx.run_id,
            correlation_id: self.ctx.correlation_id,
            status,
            cause,
            profile: self.profile,
            history: if discard {
                RunHistory::new()
            } else {
                self.history
            },
        }
    }
}
