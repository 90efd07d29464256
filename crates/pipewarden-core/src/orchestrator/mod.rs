//! Run orchestration.
//!
//! [`Orchestrator`] owns the shared collaborators (store, planner, executor,
//! profiler) and spawns one independent control loop per run:
//!
//! ```text
//! CLASSIFYING → THINKING → GATING → ACTING → OBSERVING → {THINKING | COMPLETED | FAILED}
//! ```
//!
//! Runs share nothing mutable except the [`RunStateStore`].

mod handle;
mod run_loop;

use std::sync::Arc;

use pipewarden_state::RunStateStore;
use tokio::sync::watch;
use tracing::Instrument;

use crate::config::OrchestratorConfig;
use crate::domain::{
    CorrelationId, PipewardenError, Result, RunContext, RunId, StartRunRequest, ToolCatalog,
};
use crate::executor::{Executor, ToolRegistry};
use crate::metrics::METRICS;
use crate::obs;
use crate::planner::{Planner, ReasoningBackend, ReasoningPlanner, RuleBasedPlanner};
use crate::profiler::WorkflowProfiler;
use crate::recording::{load_run, RunRecorder};
use crate::scoring::{LinearPenaltyScore, ScoreFunction};

pub use handle::{RunHandle, RunOutcome};
use run_loop::RunLoop;

/// Collaborators shared by every run.
pub(crate) struct Inner {
    pub(crate) store: Arc<dyn RunStateStore>,
    pub(crate) planner: Arc<dyn Planner>,
    pub(crate) executor: Executor,
    pub(crate) profiler: WorkflowProfiler,
    pub(crate) scoring: Arc<dyn ScoreFunction>,
    pub(crate) catalog: ToolCatalog,
    pub(crate) config: OrchestratorConfig,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(store: Arc<dyn RunStateStore>, registry: ToolRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            registry,
            planner: None,
            backend: None,
            config: OrchestratorConfig::default(),
            scoring: None,
            profiler: None,
            catalog: ToolCatalog::standard(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Open a run record and spawn its loop. Returns as soon as the record
    /// exists; the loop runs to completion in the background.
    pub async fn start(&self, request: StartRunRequest) -> Result<RunHandle> {
        let correlation_id = request
            .correlation_id
            .clone()
            .map(CorrelationId::from)
            .unwrap_or_else(CorrelationId::generate);
        let ctx = RunContext::new(RunId::new(), correlation_id);

        let (recorder, _) = RunRecorder::open(
            self.inner.store.clone(),
            ctx.clone(),
            &request,
            self.inner.config.store_timeout(),
        )
        .await?;
        METRICS.inc_runs_started();
        obs::emit_run_started(&ctx, &request.target.repository, &request.target.pipeline_path);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run = RunLoop::new(self.inner.clone(), ctx.clone(), recorder, cancel_rx);
        let task = tokio::spawn(run.start(request.metadata).instrument(obs::run_span(&ctx)));
        Ok(RunHandle::new(ctx.run_id, ctx.correlation_id, cancel_tx, task))
    }

    /// Start a run and wait for its outcome.
    pub async fn run(&self, request: StartRunRequest) -> Result<RunOutcome> {
        self.start(request).await?.wait().await
    }

    /// Continue an interrupted run from its persisted history.
    pub async fn resume(&self, run_id: &RunId) -> Result<RunHandle> {
        let timeout = self.inner.config.store_timeout();
        let (record, history) = load_run(self.inner.store.as_ref(), run_id, timeout).await?;
        if record.status.is_terminal() {
            return Err(PipewardenError::RunAlreadyFinished {
                run_id: run_id.to_string(),
                status: record.status.to_string(),
            });
        }

        let ctx = RunContext::new(record.run_id, CorrelationId::from(record.correlation_id));
        obs::emit_run_resumed(&ctx, history.len());
        let recorder = RunRecorder::attach(self.inner.store.clone(), ctx.clone(), timeout);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run = RunLoop::new(self.inner.clone(), ctx.clone(), recorder, cancel_rx);
        let task = tokio::spawn(run.resume(history).instrument(obs::run_span(&ctx)));
        Ok(RunHandle::new(ctx.run_id, ctx.correlation_id, cancel_tx, task))
    }
}

pub struct OrchestratorBuilder {
    store: Arc<dyn RunStateStore>,
    registry: ToolRegistry,
    planner: Option<Arc<dyn Planner>>,
    backend: Option<Arc<dyn ReasoningBackend>>,
    config: OrchestratorConfig,
    scoring: Option<Arc<dyn ScoreFunction>>,
    profiler: Option<WorkflowProfiler>,
    catalog: ToolCatalog,
}

impl OrchestratorBuilder {
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom planner. Takes precedence over a reasoning backend.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Plan with a [`ReasoningPlanner`] over `backend`.
    pub fn with_reasoning_backend(mut self, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_scoring(mut self, scoring: Arc<dyn ScoreFunction>) -> Self {
        self.scoring = Some(scoring);
        self
    }

    pub fn with_profiler(mut self, profiler: WorkflowProfiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn with_catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let profiler = match self.profiler {
            Some(p) => p,
            None => WorkflowProfiler::new()?,
        };
        let planner: Arc<dyn Planner> = match (self.planner, self.backend) {
            (Some(planner), _) => planner,
            (None, Some(backend)) => {
                Arc::new(ReasoningPlanner::new(backend, self.config.planner_timeout()))
            }
            (None, None) => Arc::new(RuleBasedPlanner::new()),
        };
        let scoring = self
            .scoring
            .unwrap_or_else(|| Arc::new(LinearPenaltyScore::from(&self.config.scoring)));

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                store: self.store,
                planner,
                executor: Executor::new(self.registry, self.config.executor.clone()),
                profiler,
                scoring,
                catalog: self.catalog,
                config: self.config,
            }),
        })
    }
}
