//! Storage contract for pipeline-improvement runs
//!
//! A run is persisted as two things:
//! - a `RunRecord`: target pipeline, correlation id, lifecycle stage and
//!   terminal status with its cause
//! - an ordered, append-only list of `StoredEntry` values (profile, decisions,
//!   resolutions, anomalies) addressed by a 1-based sequence number
//!
//! Entries are opaque JSON payloads here; the orchestration core owns their
//! shape. In-memory and SurrealDB implementations are provided.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a pipeline definition.
///
/// The inner field is private so the string is always lowercase hex produced
/// by `from_bytes` or validated through `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// Terminal status of a run. `Started` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "started" => Ok(RunStatus::Started),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(StorageError::Backend(format!("unknown run status: {other}"))),
        }
    }
}

/// The pipeline a run works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTarget {
    /// Repository reference (e.g. `org/name` or a clone URL)
    pub repository: String,
    /// Path of the pipeline definition inside the repository
    pub pipeline_path: String,
    /// Branch the definition was read from
    pub branch: String,
    /// Commit SHA, when known
    #[serde(default)]
    pub commit: Option<String>,
}

/// Everything needed to open a run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    pub run_id: RunId,
    pub correlation_id: String,
    pub target: PipelineTarget,
    pub trigger_source: String,
    pub definition_digest: ContentDigest,
}

/// Full run record as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub correlation_id: String,
    pub target: PipelineTarget,
    pub trigger_source: String,
    pub definition_digest: ContentDigest,
    pub status: RunStatus,
    /// Last lifecycle stage reported by the loop (e.g. "thinking")
    pub stage: String,
    /// Failure cause, present only when `status == Failed`
    pub cause: Option<String>,
    pub total_entries: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Fresh record in `Started` state.
    pub fn open(new: NewRun) -> Self {
        let now = Utc::now();
        RunRecord {
            run_id: new.run_id,
            correlation_id: new.correlation_id,
            target: new.target,
            trigger_source: new.trigger_source,
            definition_digest: new.definition_digest,
            status: RunStatus::Started,
            stage: "created".to_string(),
            cause: None,
            total_entries: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

/// One persisted history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// 1-based, gap-free sequence number within the run
    pub seq: u64,
    /// Entry kind (e.g. "decision_recorded", "decision_resolved")
    pub kind: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Filter for [`RunStateStore::list_runs`]. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub repository: Option<String>,
    pub definition_digest: Option<ContentDigest>,
}

impl RunFilter {
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_definition_digest(mut self, digest: ContentDigest) -> Self {
        self.definition_digest = Some(digest);
        self
    }

    pub fn matches(&self, record: &RunRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self
                .repository
                .as_ref()
                .map_or(true, |r| &record.target.repository == r)
            && self
                .definition_digest
                .as_ref()
                .map_or(true, |d| &record.definition_digest == d)
    }
}

// ---------------------------------------------------------------------------
// RunStateStore
// ---------------------------------------------------------------------------

/// Durable store for run records and their history.
///
/// Guarantees:
/// - Entries of one run are appended with `seq = total_entries + 1`; any other
///   value is a `SequenceConflict`, so two writers can never interleave.
/// - Writes to one run are serialized; different runs never block each other
///   beyond the backend's own locking.
/// - A run transitions `Started → Completed | Failed`; terminal runs reject
///   further entries and transitions.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Open a run record. Fails with `RunAlreadyExists` on a duplicate id.
    async fn create_run(&self, run: NewRun) -> StorageResult<RunRecord>;

    /// Append one history entry to a started run.
    async fn append_entry(&self, run_id: &RunId, entry: StoredEntry) -> StorageResult<()>;

    /// Record the loop's current lifecycle stage.
    async fn record_stage(&self, run_id: &RunId, stage: &str) -> StorageResult<()>;

    /// Close the run as completed.
    async fn complete_run(&self, run_id: &RunId) -> StorageResult<()>;

    /// Close the run as failed with a human-readable cause.
    async fn fail_run(&self, run_id: &RunId, cause: &str) -> StorageResult<()>;

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// All entries of a run ordered by `seq`.
    async fn get_entries(&self, run_id: &RunId) -> StorageResult<Vec<StoredEntry>>;

    /// Runs matching `filter`, newest first.
    async fn list_runs(&self, filter: &RunFilter) -> StorageResult<Vec<RunRecord>>;
}
