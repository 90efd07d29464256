//! Pipewarden-State: durable run records for pipeline-improvement runs
//!
//! This crate owns everything the orchestration core persists: the run
//! record (target pipeline, correlation id, status, lifecycle stage, cause)
//! and the append-only sequence of history entries written while the run
//! loop plans, gates, executes and observes.
//!
//! ## Key Components
//!
//! - `RunStateStore`: backend-agnostic async persistence contract
//! - `MemoryRunStateStore`: in-process implementation (tests, dry runs)
//! - `SurrealRunStateStore`: SurrealDB implementation (`mem://`, `surrealkv://`, remote)

mod error;
pub mod fakes;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use storage_traits::{
    ContentDigest, NewRun, PipelineTarget, RunFilter, RunId, RunRecord, RunStateStore, RunStatus,
    StorageResult, StoredEntry,
};
pub use surreal_store::SurrealRunStateStore;

/// Result type for connection and schema setup
pub type Result<T> = std::result::Result<T, StateError>;
