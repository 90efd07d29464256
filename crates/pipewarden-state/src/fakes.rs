//! In-memory implementation of [`RunStateStore`]
//!
//! Every run gets its own lock, so writers to one run are serialized while
//! runs stay independent of each other. The outer map lock is only held long
//! enough to look up or insert a slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct RunSlot {
    /// Insertion order, breaks ties between identical `created_at` values.
    ordinal: u64,
    record: RunRecord,
    entries: Vec<StoredEntry>,
}

impl RunSlot {
    fn ensure_started(&self) -> StorageResult<()> {
        if self.record.status.is_terminal() {
            return Err(StorageError::InvalidRunState {
                run_id: self.record.run_id.to_string(),
                status: self.record.status.to_string(),
                expected: RunStatus::Started.to_string(),
            });
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Backend("in-memory store lock poisoned".to_string())
}

/// In-memory run store backed by `HashMap<RunId, Mutex<RunSlot>>`.
#[derive(Debug, Default)]
pub struct MemoryRunStateStore {
    runs: RwLock<HashMap<String, Arc<Mutex<RunSlot>>>>,
    next_ordinal: AtomicU64,
}

impl MemoryRunStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, run_id: &RunId) -> StorageResult<Arc<Mutex<RunSlot>>> {
        let runs = self.runs.read().map_err(poisoned)?;
        runs.get(run_id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    fn with_slot<T>(
        &self,
        run_id: &RunId,
        f: impl FnOnce(&mut RunSlot) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let slot = self.slot(run_id)?;
        let mut guard = slot.lock().map_err(poisoned)?;
        f(&mut guard)
    }
}

#[async_trait]
impl RunStateStore for MemoryRunStateStore {
    async fn create_run(&self, run: NewRun) -> StorageResult<RunRecord> {
        let mut runs = self.runs.write().map_err(poisoned)?;
        if runs.contains_key(run.run_id.as_str()) {
            return Err(StorageError::RunAlreadyExists {
                run_id: run.run_id.to_string(),
            });
        }
        let record = RunRecord::open(run);
        let slot = RunSlot {
            ordinal: self.next_ordinal.fetch_add(1, Ordering::Relaxed),
            record: record.clone(),
            entries: Vec::new(),
        };
        runs.insert(record.run_id.to_string(), Arc::new(Mutex::new(slot)));
        Ok(record)
    }

    async fn append_entry(&self, run_id: &RunId, entry: StoredEntry) -> StorageResult<()> {
        self.with_slot(run_id, |slot| {
            slot.ensure_started()?;
            let expected = slot.record.total_entries + 1;
            if entry.seq != expected {
                return Err(StorageError::SequenceConflict {
                    run_id: run_id.to_string(),
                    expected,
                    got: entry.seq,
                });
            }
            slot.entries.push(entry);
            slot.record.total_entries = expected;
            slot.record.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn record_stage(&self, run_id: &RunId, stage: &str) -> StorageResult<()> {
        self.with_slot(run_id, |slot| {
            slot.ensure_started()?;
            slot.record.stage = stage.to_string();
            slot.record.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn complete_run(&self, run_id: &RunId) -> StorageResult<()> {
        self.with_slot(run_id, |slot| {
            slot.ensure_started()?;
            let now = Utc::now();
            slot.record.status = RunStatus::Completed;
            slot.record.stage = "completed".to_string();
            slot.record.updated_at = now;
            slot.record.finished_at = Some(now);
            Ok(())
        })
    }

    async fn fail_run(&self, run_id: &RunId, cause: &str) -> StorageResult<()> {
        self.with_slot(run_id, |slot| {
            slot.ensure_started()?;
            let now = Utc::now();
            slot.record.status = RunStatus::Failed;
            slot.record.stage = "failed".to_string();
            slot.record.cause = Some(cause.to_string());
            slot.record.updated_at = now;
            slot.record.finished_at = Some(now);
            Ok(())
        })
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.with_slot(run_id, |slot| Ok(slot.record.clone()))
    }

    async fn get_entries(&self, run_id: &RunId) -> StorageResult<Vec<StoredEntry>> {
        self.with_slot(run_id, |slot| Ok(slot.entries.clone()))
    }

    async fn list_runs(&self, filter: &RunFilter) -> StorageResult<Vec<RunRecord>> {
        let slots: Vec<Arc<Mutex<RunSlot>>> = {
            let runs = self.runs.read().map_err(poisoned)?;
            runs.values().cloned().collect()
        };

        let mut matched = Vec::new();
        for slot in slots {
            let guard = slot.lock().map_err(poisoned)?;
            if filter.matches(&guard.record) {
                matched.push((guard.record.created_at, guard.ordinal, guard.record.clone()));
            }
        }
        matched.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(matched.into_iter().map(|(_, _, rec)| rec).collect())
    }
}
