//! Bridges the in-memory run history to [`RunStateStore`] persistence.
//!
//! Every store call is bounded by the configured store timeout. A failed or
//! timed-out write surfaces as a [`PipewardenError`] so the loop can stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pipewarden_state::{ContentDigest, NewRun, RunRecord, RunStateStore, StorageResult, StoredEntry};

use crate::domain::{
    EntryKind, FailureCause, HistoryEntry, PipewardenError, Result, RunContext, RunHistory, RunId,
    RunStage, StartRunRequest,
};
use crate::obs;

pub struct RunRecorder {
    store: Arc<dyn RunStateStore>,
    ctx: RunContext,
    timeout: Duration,
}

impl RunRecorder {
    /// Create the run record and return a recorder bound to it.
    pub async fn open(
        store: Arc<dyn RunStateStore>,
        ctx: RunContext,
        request: &StartRunRequest,
        timeout: Duration,
    ) -> Result<(Self, RunRecord)> {
        let recorder = Self::attach(store, ctx, timeout);
        let new_run = NewRun {
            run_id: recorder.ctx.run_id.clone(),
            correlation_id: recorder.ctx.correlation_id.to_string(),
            target: request.target.clone(),
            trigger_source: request.trigger_source.clone(),
            definition_digest: ContentDigest::from_bytes(request.metadata.definition.as_bytes()),
        };
        let record = recorder
            .bounded("create_run", recorder.store.create_run(new_run))
            .await?;
        Ok((recorder, record))
    }

    /// Bind to an existing run (resumption).
    pub fn attach(store: Arc<dyn RunStateStore>, ctx: RunContext, timeout: Duration) -> Self {
        Self {
            store,
            ctx,
            timeout,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Persist one history entry.
    pub async fn record(&self, entry: &HistoryEntry) -> Result<()> {
        let stored = StoredEntry {
            seq: entry.seq,
            kind: entry.entry.kind_str().to_string(),
            payload: serde_json::to_value(&entry.entry)?,
            recorded_at: entry.recorded_at,
        };
        self.bounded("append_entry", self.store.append_entry(&self.ctx.run_id, stored))
            .await
    }

    pub async fn stage(&self, stage: RunStage) -> Result<()> {
        self.bounded(
            "record_stage",
            self.store.record_stage(&self.ctx.run_id, stage.as_str()),
        )
        .await
    }

    pub async fn finish_ok(&self) -> Result<()> {
        self.bounded("complete_run", self.store.complete_run(&self.ctx.run_id))
            .await
    }

    pub async fn finish_err(&self, cause: &FailureCause) -> Result<()> {
        self.bounded(
            "fail_run",
            self.store.fail_run(&self.ctx.run_id, &cause.to_string()),
        )
        .await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StorageResult<T>>,
    ) -> Result<T> {
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(PipewardenError::from),
            Err(_) => Err(PipewardenError::StoreTimeout {
                operation,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        if let Err(e) = &outcome {
            obs::emit_store_write_failed(&self.ctx, operation, e);
        }
        outcome
    }
}

/// Read a run record and its decoded history (resumption, inspection).
pub async fn load_run(
    store: &dyn RunStateStore,
    run_id: &RunId,
    timeout: Duration,
) -> Result<(RunRecord, RunHistory)> {
    let bounded_ms = timeout.as_millis() as u64;
    let record = tokio::time::timeout(timeout, store.get_run(run_id))
        .await
        .map_err(|_| PipewardenError::StoreTimeout {
            operation: "get_run",
            timeout_ms: bounded_ms,
        })??;
    let stored = tokio::time::timeout(timeout, store.get_entries(run_id))
        .await
        .map_err(|_| PipewardenError::StoreTimeout {
            operation: "get_entries",
            timeout_ms: bounded_ms,
        })??;
    Ok((record, decode_entries(stored)?))
}

/// Rebuild a history from stored entries.
pub fn decode_entries(stored: Vec<StoredEntry>) -> Result<RunHistory> {
    let entries = stored
        .into_iter()
        .map(|s| {
            let entry: EntryKind = serde_json::from_value(s.payload).map_err(|e| {
                PipewardenError::CorruptHistory(format!("entry {}: {e}", s.seq))
            })?;
            if entry.kind_str() != s.kind {
                return Err(PipewardenError::CorruptHistory(format!(
                    "entry {}: kind `{}` does not match payload `{}`",
                    s.seq,
                    s.kind,
                    entry.kind_str()
                )));
            }
            Ok(HistoryEntry {
                seq: s.seq,
                recorded_at: s.recorded_at,
                entry,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    RunHistory::from_entries(entries)
}
