//! Scripted collaborators for tests and dry runs.
//!
//! - `ScriptedToolAdapter`: queued outcomes per tool, records every call
//! - `ScriptedReasoningBackend`: queued raw replies, unavailable once drained
//! - `FlakyStore`: wraps a store and starts failing writes after N successes

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pipewarden_state::{
    NewRun, RunFilter, RunId, RunRecord, RunStateStore, StorageError, StorageResult, StoredEntry,
};
use serde::{Deserialize, Serialize};

use crate::domain::{RunContext, ToolId, ToolOutput};
use crate::executor::{ToolAdapter, ToolError, ToolInput, ToolRegistry};
use crate::planner::{BackendError, ReasoningBackend, ReasoningRequest};

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// One scripted adapter response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScriptedOutcome {
    Ok {
        #[serde(default)]
        output: ToolOutput,
    },
    Transient {
        message: String,
    },
    Rejected {
        message: String,
    },
    Unavailable {
        message: String,
    },
    /// Sleep for `ms` before answering with an empty output.
    Hang {
        ms: u64,
    },
}

impl ScriptedOutcome {
    pub fn ok(output: ToolOutput) -> Self {
        ScriptedOutcome::Ok { output }
    }
}

/// Outcomes per tool, consumed front to back. Loaded from the CLI's
/// `--outputs` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolScript {
    pub tools: BTreeMap<ToolId, Vec<ScriptedOutcome>>,
}

impl ToolScript {
    pub fn push(mut self, tool: ToolId, outcome: ScriptedOutcome) -> Self {
        self.tools.entry(tool).or_default().push(outcome);
        self
    }
}

/// Adapter answering from a [`ToolScript`]. A tool whose queue is empty
/// succeeds with an empty output.
#[derive(Debug, Default)]
pub struct ScriptedToolAdapter {
    queues: Mutex<BTreeMap<ToolId, VecDeque<ScriptedOutcome>>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ToolId>>,
}

impl ScriptedToolAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: ToolScript) -> Self {
        Self {
            queues: Mutex::new(
                script
                    .tools
                    .into_iter()
                    .map(|(tool, outcomes)| (tool, outcomes.into()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn with_outcome(self, tool: ToolId, outcome: ScriptedOutcome) -> Self {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(tool).or_default().push_back(outcome);
        }
        self
    }

    pub fn with_output(self, tool: ToolId, output: ToolOutput) -> Self {
        self.with_outcome(tool, ScriptedOutcome::ok(output))
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<ToolId> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, tool: ToolId) -> usize {
        self.calls().iter().filter(|t| **t == tool).count()
    }
}

#[async_trait]
impl ToolAdapter for ScriptedToolAdapter {
    async fn call(&self, _ctx: &RunContext, input: &ToolInput) -> Result<ToolOutput, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(input.tool);
        }
        let next = self
            .queues
            .lock()
            .ok()
            .and_then(|mut q| q.get_mut(&input.tool).and_then(VecDeque::pop_front));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match next {
            None => Ok(ToolOutput::default()),
            Some(ScriptedOutcome::Ok { output }) => Ok(output),
            Some(ScriptedOutcome::Transient { message }) => Err(ToolError::Transient(message)),
            Some(ScriptedOutcome::Rejected { message }) => Err(ToolError::Rejected(message)),
            Some(ScriptedOutcome::Unavailable { message }) => Err(ToolError::Unavailable(message)),
            Some(ScriptedOutcome::Hang { ms }) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ToolOutput::default())
            }
        }
    }
}

/// Registry serving every tool from one scripted adapter.
pub fn registry_from_script(script: ToolScript) -> ToolRegistry {
    ToolRegistry::uniform(Arc::new(ScriptedToolAdapter::from_script(script)))
}

// ---------------------------------------------------------------------------
// Reasoning backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ScriptedReasoningBackend {
    replies: Mutex<VecDeque<String>>,
    requests: AtomicU64,
}

impl ScriptedReasoningBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: AtomicU64::new(0),
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedReasoningBackend {
    async fn complete(
        &self,
        _ctx: &RunContext,
        _request: &ReasoningRequest,
    ) -> Result<String, BackendError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or_else(|| BackendError::Unavailable("no scripted reply left".into()))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Store wrapper whose `append_entry`, `record_stage` and `complete_run`
/// fail once `budget` writes have gone through. `fail_run` and reads always
/// reach the inner store.
pub struct FlakyStore {
    inner: Arc<dyn RunStateStore>,
    budget: u64,
    writes: AtomicU64,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn RunStateStore>, budget: u64) -> Self {
        Self {
            inner,
            budget,
            writes: AtomicU64::new(0),
        }
    }

    fn admit(&self) -> StorageResult<()> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.budget {
            return Err(StorageError::Backend("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RunStateStore for FlakyStore {
    async fn create_run(&self, run: NewRun) -> StorageResult<RunRecord> {
        self.inner.create_run(run).await
    }

    async fn append_entry(&self, run_id: &RunId, entry: StoredEntry) -> StorageResult<()> {
        self.admit()?;
        self.inner.append_entry(run_id, entry).await
    }

    async fn record_stage(&self, run_id: &RunId, stage: &str) -> StorageResult<()> {
        self.admit()?;
        self.inner.record_stage(run_id, stage).await
    }

    async fn complete_run(&self, run_id: &RunId) -> StorageResult<()> {
        self.admit()?;
        self.inner.complete_run(run_id).await
    }

    async fn fail_run(&self, run_id: &RunId, cause: &str) -> StorageResult<()> {
        self.inner.fail_run(run_id, cause).await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.inner.get_run(run_id).await
    }

    async fn get_entries(&self, run_id: &RunId) -> StorageResult<Vec<StoredEntry>> {
        self.inner.get_entries(run_id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> StorageResult<Vec<RunRecord>> {
        self.inner.list_runs(filter).await
    }
}
