//! SurrealDB schema initialization for pipewarden tables
//!
//! Safe to call on every connection; all definitions use `IF NOT EXISTS`.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;
use crate::Result;

/// Initialize all pipewarden tables.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing pipewarden SurrealDB schema");
    init_runs_table(db).await?;
    init_run_entries_table(db).await?;
    info!("pipewarden schema initialization complete");
    Ok(())
}

/// `pw_runs`: one row per run.
///
/// ```text
/// TABLE pw_runs {
///   run_id:            STRING (unique)
///   correlation_id:    STRING (indexed)
///   repository:        STRING (indexed)
///   pipeline_path, branch, commit?, trigger_source
///   definition_digest: STRING (indexed)
///   status:            STRING (started | completed | failed)
///   stage:             STRING
///   cause:             STRING?
///   total_entries:     INT
///   created_at, updated_at: DATETIME
///   finished_at:       DATETIME?
/// }
/// ```
///
/// Status transitions and terminal immutability are enforced by the store.
async fn init_runs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing pw_runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS pw_runs SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_pw_run_id ON TABLE pw_runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_pw_correlation ON TABLE pw_runs COLUMNS correlation_id;
        DEFINE INDEX IF NOT EXISTS idx_pw_repository ON TABLE pw_runs COLUMNS repository;
        DEFINE INDEX IF NOT EXISTS idx_pw_definition ON TABLE pw_runs COLUMNS definition_digest;
        DEFINE INDEX IF NOT EXISTS idx_pw_status ON TABLE pw_runs COLUMNS status;
    "#;

    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StateError::SchemaSetup(format!("pw_runs: {e}")))?;
    Ok(())
}

/// `pw_run_entries`: append-only history.
///
/// `(run_id, seq)` is unique, which rejects a second writer racing for the
/// same sequence slot even across processes.
async fn init_run_entries_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing pw_run_entries table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS pw_run_entries SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_pw_entry_run_seq ON TABLE pw_run_entries COLUMNS run_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_pw_entry_run ON TABLE pw_run_entries COLUMNS run_id;
        DEFINE INDEX IF NOT EXISTS idx_pw_entry_kind ON TABLE pw_run_entries COLUMNS kind;
    "#;

    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StateError::SchemaSetup(format!("pw_run_entries: {e}")))?;
    Ok(())
}
