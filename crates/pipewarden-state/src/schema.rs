//! Row types for the pipewarden SurrealDB tables
//!
//! Tables:
//! - pw_runs: one row per run (target, status, stage, cause)
//! - pw_run_entries: append-only history entries keyed by (run_id, seq)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    ContentDigest, PipelineTarget, RunId, RunRecord, RunStatus, StorageResult, StoredEntry,
};

/// Serialize chrono timestamps as native SurrealDB datetimes
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde::Serialize::serialize(&SurrealDatetime::from(*date), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde::Serialize::serialize(&date.map(SurrealDatetime::from), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Row in `pw_runs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbRun {
    /// SurrealDB record ID (never written back on update)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    pub correlation_id: String,
    pub repository: String,
    pub pipeline_path: String,
    pub branch: String,
    pub commit: Option<String>,
    pub trigger_source: String,
    pub definition_digest: String,
    /// "started" | "completed" | "failed"
    pub status: String,
    pub stage: String,
    pub cause: Option<String>,
    pub total_entries: u64,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DbRun {
    pub fn from_record(rec: &RunRecord) -> Self {
        DbRun {
            id: None,
            run_id: rec.run_id.to_string(),
            correlation_id: rec.correlation_id.clone(),
            repository: rec.target.repository.clone(),
            pipeline_path: rec.target.pipeline_path.clone(),
            branch: rec.target.branch.clone(),
            commit: rec.target.commit.clone(),
            trigger_source: rec.trigger_source.clone(),
            definition_digest: rec.definition_digest.as_str().to_string(),
            status: rec.status.as_str().to_string(),
            stage: rec.stage.clone(),
            cause: rec.cause.clone(),
            total_entries: rec.total_entries,
            created_at: rec.created_at,
            updated_at: rec.updated_at,
            finished_at: rec.finished_at,
        }
    }

    pub fn into_record(self) -> StorageResult<RunRecord> {
        Ok(RunRecord {
            run_id: RunId(self.run_id),
            correlation_id: self.correlation_id,
            target: PipelineTarget {
                repository: self.repository,
                pipeline_path: self.pipeline_path,
                branch: self.branch,
                commit: self.commit,
            },
            trigger_source: self.trigger_source,
            definition_digest: ContentDigest::try_from(self.definition_digest)?,
            status: self.status.parse::<RunStatus>()?,
            stage: self.stage,
            cause: self.cause,
            total_entries: self.total_entries,
            created_at: self.created_at,
            updated_at: self.updated_at,
            finished_at: self.finished_at,
        })
    }

    /// Close the row with a terminal status.
    pub fn finish(mut self, status: RunStatus, cause: Option<String>) -> Self {
        let now = Utc::now();
        self.status = status.as_str().to_string();
        self.stage = status.as_str().to_string();
        self.cause = cause;
        self.updated_at = now;
        self.finished_at = Some(now);
        self
    }
}

/// Row in `pw_run_entries`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    pub seq: u64,
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl DbEntry {
    pub fn new(run_id: &RunId, entry: StoredEntry) -> Self {
        DbEntry {
            id: None,
            run_id: run_id.to_string(),
            seq: entry.seq,
            kind: entry.kind,
            payload: entry.payload,
            recorded_at: entry.recorded_at,
        }
    }

    pub fn into_entry(self) -> StoredEntry {
        StoredEntry {
            seq: self.seq,
            kind: self.kind,
            payload: self.payload,
            recorded_at: self.recorded_at,
        }
    }
}
