//! Caller-side view of a running loop.

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{
    CorrelationId, Decision, FailureCause, PipewardenError, Result, RunHistory, RunId, RunStatus,
    ToolId, WorkflowProfile,
};

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub correlation_id: CorrelationId,
    pub status: RunStatus,
    pub cause: Option<FailureCause>,
    pub profile: Option<WorkflowProfile>,
    /// Empty when the audit trail could not be written.
    pub history: RunHistory,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Tools that were dispatched, in execution order.
    pub fn executed_tools(&self) -> Vec<ToolId> {
        self.history.action_results().map(|r| r.tool).collect()
    }

    /// Tools that ran and succeeded, in execution order.
    pub fn completed_tools(&self) -> Vec<ToolId> {
        self.history
            .action_results()
            .filter(|r| r.success)
            .map(|r| r.tool)
            .collect()
    }

    pub fn decisions(&self) -> Vec<&Decision> {
        self.history.decisions().map(|(_, d)| d).collect()
    }

    /// PR reference from a successful resolve, if any.
    pub fn pr_reference(&self) -> Option<&str> {
        self.history.action_results().find_map(|r| r.pr_reference())
    }
}

/// Returned by `start`/`resume` as soon as the loop is spawned.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    correlation_id: CorrelationId,
    cancel: watch::Sender<bool>,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: RunId,
        correlation_id: CorrelationId,
        cancel: watch::Sender<bool>,
        task: JoinHandle<RunOutcome>,
    ) -> Self {
        Self {
            run_id,
            correlation_id,
            cancel,
            task,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Ask the loop to stop at its next safe boundary.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub async fn wait(self) -> Result<RunOutcome> {
        self.task
            .await
            .map_err(|e| PipewardenError::TaskAborted(e.to_string()))
    }
}
