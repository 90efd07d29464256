//! SurrealDB-backed [`RunStateStore`]
//!
//! Uses `schema::DbRun` / `schema::DbEntry` rows, converting to the
//! `storage_traits` types at the boundary. Writes to one run go through a
//! per-run async lock so the sequence check and the insert are atomic with
//! respect to other writers in this process; the unique `(run_id, seq)` index
//! covers writers elsewhere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{DbEntry, DbRun};
use crate::storage_traits::{
    NewRun, RunFilter, RunId, RunRecord, RunStateStore, RunStatus, StorageResult, StoredEntry,
};

const NAMESPACE: &str = "pipewarden";
const DATABASE: &str = "main";

fn backend(e: surrealdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// SurrealDB-backed implementation of [`RunStateStore`].
pub struct SurrealRunStateStore {
    db: Surreal<Any>,
    run_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SurrealRunStateStore {
    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`),
    /// select `pipewarden/main` and initialise the schema.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(url = %url, "SurrealRunStateStore connected");

        Ok(Self {
            db,
            run_locks: Mutex::new(HashMap::new()),
        })
    }

    /// In-memory instance for tests and dry runs.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// `SURREALDB_URL` when set, else local persistence under `.pipewarden/db`.
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }

        let path = ".pipewarden/db";
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!("Failed to create database directory {path}: {e}"))
        })?;
        info!(path = %path, "No SURREALDB_URL found, using local persistence");
        Self::connect(&format!("surrealkv://{path}")).await
    }

    // -- private helpers -----------------------------------------------------

    fn run_lock(&self, rid: &str) -> StorageResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .run_locks
            .lock()
            .map_err(|_| StorageError::Backend("run lock table poisoned".to_string()))?;
        Ok(locks.entry(rid.to_string()).or_default().clone())
    }

    async fn fetch_run(&self, rid: &str) -> StorageResult<DbRun> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM pw_runs WHERE run_id = $rid")
            .bind(("rid", rid_owned))
            .await
            .map_err(backend)?;

        let rows: Vec<DbRun> = res.take(0).map_err(backend)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: rid.to_string(),
            })
    }

    async fn fetch_started(&self, rid: &str) -> StorageResult<DbRun> {
        let row = self.fetch_run(rid).await?;
        if row.status != RunStatus::Started.as_str() {
            return Err(StorageError::InvalidRunState {
                run_id: rid.to_string(),
                status: row.status,
                expected: RunStatus::Started.to_string(),
            });
        }
        Ok(row)
    }

    async fn write_run(&self, row: DbRun) -> StorageResult<()> {
        let rid_owned = row.run_id.clone();
        self.db
            .query("UPDATE pw_runs CONTENT $row WHERE run_id = $rid")
            .bind(("row", row))
            .bind(("rid", rid_owned))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn finish(
        &self,
        run_id: &RunId,
        status: RunStatus,
        cause: Option<String>,
    ) -> StorageResult<()> {
        let lock = self.run_lock(run_id.as_str())?;
        let _guard = lock.lock().await;

        let row = self.fetch_started(run_id.as_str()).await?;
        debug!(run_id = %run_id, status = %status, "closing run");
        self.write_run(row.finish(status, cause)).await?;
        self.release_lock(run_id.as_str());
        Ok(())
    }

    /// Forget a terminal run's lock. Later writes fail the status check.
    fn release_lock(&self, rid: &str) {
        if let Ok(mut locks) = self.run_locks.lock() {
            locks.remove(rid);
        }
    }
}

#[async_trait]
impl RunStateStore for SurrealRunStateStore {
    async fn create_run(&self, run: NewRun) -> StorageResult<RunRecord> {
        let lock = self.run_lock(run.run_id.as_str())?;
        let _guard = lock.lock().await;

        match self.fetch_run(run.run_id.as_str()).await {
            Ok(_) => {
                return Err(StorageError::RunAlreadyExists {
                    run_id: run.run_id.to_string(),
                })
            }
            Err(StorageError::RunNotFound { .. }) => {}
            Err(other) => return Err(other),
        }

        let record = RunRecord::open(run);
        debug!(run_id = %record.run_id, "creating run");

        let _created: Option<DbRun> = self
            .db
            .create("pw_runs")
            .content(DbRun::from_record(&record))
            .await
            .map_err(backend)?;

        Ok(record)
    }

    async fn append_entry(&self, run_id: &RunId, entry: StoredEntry) -> StorageResult<()> {
        let lock = self.run_lock(run_id.as_str())?;
        let _guard = lock.lock().await;

        let mut row = self.fetch_started(run_id.as_str()).await?;
        let expected = row.total_entries + 1;
        if entry.seq != expected {
            return Err(StorageError::SequenceConflict {
                run_id: run_id.to_string(),
                expected,
                got: entry.seq,
            });
        }

        row.total_entries = expected;
        row.updated_at = Utc::now();

        // Entry row and run counter commit together or not at all.
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE pw_run_entries CONTENT $entry; \
                 UPDATE pw_runs CONTENT $row WHERE run_id = $rid; \
                 COMMIT TRANSACTION;",
            )
            .bind(("entry", DbEntry::new(run_id, entry)))
            .bind(("row", row))
            .bind(("rid", run_id.to_string()))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn record_stage(&self, run_id: &RunId, stage: &str) -> StorageResult<()> {
        let lock = self.run_lock(run_id.as_str())?;
        let _guard = lock.lock().await;

        let mut row = self.fetch_started(run_id.as_str()).await?;
        row.stage = stage.to_string();
        row.updated_at = Utc::now();
        self.write_run(row).await
    }

    async fn complete_run(&self, run_id: &RunId) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Completed, None).await
    }

    async fn fail_run(&self, run_id: &RunId, cause: &str) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Failed, Some(cause.to_string()))
            .await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.fetch_run(run_id.as_str()).await?.into_record()
    }

    async fn get_entries(&self, run_id: &RunId) -> StorageResult<Vec<StoredEntry>> {
        self.fetch_run(run_id.as_str()).await?;

        let rid_owned = run_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM pw_run_entries WHERE run_id = $rid ORDER BY seq ASC")
            .bind(("rid", rid_owned))
            .await
            .map_err(backend)?;

        let rows: Vec<DbEntry> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(DbEntry::into_entry).collect())
    }

    async fn list_runs(&self, filter: &RunFilter) -> StorageResult<Vec<RunRecord>> {
        let mut clauses = Vec::new();
        if filter.status.is_some() {
            clauses.push("status = $status");
        }
        if filter.repository.is_some() {
            clauses.push("repository = $repository");
        }
        if filter.definition_digest.is_some() {
            clauses.push("definition_digest = $digest");
        }

        let mut sql = String::from("SELECT * FROM pw_runs");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = self.db.query(sql);
        if let Some(status) = filter.status {
            query = query.bind(("status", status.as_str().to_string()));
        }
        if let Some(repository) = &filter.repository {
            query = query.bind(("repository", repository.clone()));
        }
        if let Some(digest) = &filter.definition_digest {
            query = query.bind(("digest", digest.as_str().to_string()));
        }

        let mut res = query.await.map_err(backend)?;
        let rows: Vec<DbRun> = res.take(0).map_err(backend)?;
        rows.into_iter().map(DbRun::into_record).collect()
    }
}
