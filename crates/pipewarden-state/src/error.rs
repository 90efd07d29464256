//! Error types for pipewarden-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by [`crate::RunStateStore`] operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("run already exists: {run_id}")]
    RunAlreadyExists { run_id: String },

    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    #[error("sequence conflict on run {run_id}: expected seq {expected}, got {got}")]
    SequenceConflict { run_id: String, expected: u64, got: u64 },

    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
