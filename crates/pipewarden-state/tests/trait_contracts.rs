//! Contract tests for RunStateStore.
//!
//! Every check runs against both the in-memory store and the SurrealDB store
//! (`mem://`). Any conforming implementation must pass these.

use std::sync::Arc;

use chrono::Utc;
use pipewarden_state::fakes::MemoryRunStateStore;
use pipewarden_state::storage_traits::*;
use pipewarden_state::{StorageError, SurrealRunStateStore};

fn new_run(repo: &str, definition: &[u8]) -> NewRun {
    NewRun {
        run_id: RunId::new(),
        correlation_id: "48273945".to_string(),
        target: PipelineTarget {
            repository: repo.to_string(),
            pipeline_path: ".github/workflows/ci.yml".to_string(),
            branch: "main".to_string(),
            commit: Some("0a1b2c3".to_string()),
        },
        trigger_source: "pull_request".to_string(),
        definition_digest: ContentDigest::from_bytes(definition),
    }
}

fn entry(seq: u64, kind: &str) -> StoredEntry {
    StoredEntry {
        seq,
        kind: kind.to_string(),
        payload: serde_json::json!({ "seq": seq, "kind": kind }),
        recorded_at: Utc::now(),
    }
}

async fn backends() -> Vec<(&'static str, Arc<dyn RunStateStore>)> {
    vec![
        ("memory", Arc::new(MemoryRunStateStore::new())),
        (
            "surreal",
            Arc::new(SurrealRunStateStore::in_memory().await.unwrap()),
        ),
    ]
}

// ===========================================================================
// Lifecycle
// ===========================================================================

#[tokio::test]
async fn created_run_is_started_and_readable() {
    for (name, store) in backends().await {
        let run = new_run("org/app", b"on: push");
        let run_id = run.run_id.clone();
        let created = store.create_run(run).await.unwrap();

        let fetched = store.get_run(&run_id).await.unwrap();
        assert_eq!(fetched.status, RunStatus::Started, "{name}");
        assert_eq!(fetched.correlation_id, "48273945", "{name}");
        assert_eq!(fetched.target, created.target, "{name}");
        assert_eq!(fetched.total_entries, 0, "{name}");
    }
}

#[tokio::test]
async fn duplicate_run_id_is_rejected() {
    for (name, store) in backends().await {
        let run = new_run("org/app", b"on: push");
        store.create_run(run.clone()).await.unwrap();
        let err = store.create_run(run).await.unwrap_err();
        assert!(
            matches!(err, StorageError::RunAlreadyExists { .. }),
            "{name}: {err}"
        );
    }
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    for (name, store) in backends().await {
        let err = store.get_run(&RunId::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::RunNotFound { .. }), "{name}");
    }
}

#[tokio::test]
async fn failed_run_keeps_cause_and_rejects_further_writes() {
    for (name, store) in backends().await {
        let run = new_run("org/app", b"on: push");
        let run_id = run.run_id.clone();
        store.create_run(run).await.unwrap();
        store.append_entry(&run_id, entry(1, "profile_assigned")).await.unwrap();
        store.fail_run(&run_id, "cancelled by request").await.unwrap();

        let rec = store.get_run(&run_id).await.unwrap();
        assert_eq!(rec.status, RunStatus::Failed, "{name}");
        assert_eq!(rec.cause.as_deref(), Some("cancelled by request"), "{name}");
        assert!(rec.finished_at.is_some(), "{name}");

        let err = store
            .append_entry(&run_id, entry(2, "anomaly"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::InvalidRunState { .. }),
            "{name}: {err}"
        );
        let err = store.complete_run(&run_id).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRunState { .. }), "{name}");
    }
}

#[tokio::test]
async fn completed_run_has_no_cause() {
    for (name, store) in backends().await {
        let run = new_run("org/app", b"on: push");
        let run_id = run.run_id.clone();
        store.create_run(run).await.unwrap();
        store.record_stage(&run_id, "thinking").await.unwrap();
        assert_eq!(store.get_run(&run_id).await.unwrap().stage, "thinking", "{name}");

        store.complete_run(&run_id).await.unwrap();
        let rec = store.get_run(&run_id).await.unwrap();
        assert_eq!(rec.status, RunStatus::Completed, "{name}");
        assert!(rec.cause.is_none(), "{name}");

        let err = store.record_stage(&run_id, "thinking").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRunState { .. }), "{name}");
    }
}

// ===========================================================================
// Entries
// ===========================================================================

#[tokio::test]
async fn entries_come_back_in_sequence_order() {
    for (name, store) in backends().await {
        let run = new_run("org/app", b"on: push");
        let run_id = run.run_id.clone();
        store.create_run(run).await.unwrap();

        let kinds = ["profile_assigned", "decision_recorded", "decision_resolved"];
        for (i, kind) in kinds.iter().enumerate() {
            store
                .append_entry(&run_id, entry(i as u64 + 1, kind))
                .await
                .unwrap();
        }

        let entries = store.get_entries(&run_id).await.unwrap();
        let got: Vec<_> = entries.iter().map(|e| (e.seq, e.kind.as_str())).collect();
        assert_eq!(
            got,
            vec![
                (1, "profile_assigned"),
                (2, "decision_recorded"),
                (3, "decision_resolved")
            ],
            "{name}"
        );
        assert_eq!(entries[1].payload["kind"], "decision_recorded", "{name}");
        assert_eq!(store.get_run(&run_id).await.unwrap().total_entries, 3, "{name}");
    }
}

#[tokio::test]
async fn out_of_order_sequence_is_a_conflict() {
    for (name, store) in backends().await {
        let run = new_run("org/app", b"on: push");
        let run_id = run.run_id.clone();
        store.create_run(run).await.unwrap();
        store.append_entry(&run_id, entry(1, "profile_assigned")).await.unwrap();

        let err = store
            .append_entry(&run_id, entry(1, "decision_recorded"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StorageError::SequenceConflict {
                run_id: run_id.to_string(),
                expected: 2,
                got: 1
            },
            "{name}"
        );

        let err = store
            .append_entry(&run_id, entry(5, "decision_recorded"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SequenceConflict { .. }), "{name}");
        assert_eq!(store.get_entries(&run_id).await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn concurrent_runs_write_independently() {
    for (name, store) in backends().await {
        let mut ids = Vec::new();
        for i in 0..4 {
            let run = new_run(&format!("org/app-{i}"), b"on: push");
            ids.push(run.run_id.clone());
            store.create_run(run).await.unwrap();
        }

        let mut tasks = Vec::new();
        for run_id in ids.clone() {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for seq in 1..=5 {
                    store.append_entry(&run_id, entry(seq, "anomaly")).await?;
                }
                Ok::<_, StorageError>(())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for run_id in &ids {
            let entries = store.get_entries(run_id).await.unwrap();
            let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
            assert_eq!(seqs, vec![1, 2, 3, 4, 5], "{name}");
        }
    }
}

#[tokio::test]
async fn racing_writers_on_one_run_never_duplicate_a_sequence() {
    for (name, store) in backends().await {
        let run = new_run("org/app", b"on: push");
        let run_id = run.run_id.clone();
        store.create_run(run).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let run_id = run_id.clone();
            tasks.push(tokio::spawn(async move {
                store.append_entry(&run_id, entry(1, "profile_assigned")).await
            }));
        }
        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => ok += 1,
                Err(StorageError::SequenceConflict { .. }) => {}
                Err(other) => panic!("{name}: unexpected error {other}"),
            }
        }
        assert_eq!(ok, 1, "{name}");
        assert_eq!(store.get_entries(&run_id).await.unwrap().len(), 1, "{name}");
    }
}

// ===========================================================================
// Listing
// ===========================================================================

#[tokio::test]
async fn list_runs_filters_by_status_repository_and_definition() {
    for (name, store) in backends().await {
        let a = new_run("org/alpha", b"def-a");
        let b = new_run("org/beta", b"def-b");
        let c = new_run("org/alpha", b"def-b");
        let (a_id, b_id, c_id) = (a.run_id.clone(), b.run_id.clone(), c.run_id.clone());
        store.create_run(a).await.unwrap();
        store.create_run(b).await.unwrap();
        store.create_run(c).await.unwrap();
        store.complete_run(&a_id).await.unwrap();
        store.fail_run(&b_id, "iteration cap exceeded").await.unwrap();

        let all = store.list_runs(&RunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3, "{name}");

        let alpha = store
            .list_runs(&RunFilter::default().with_repository("org/alpha"))
            .await
            .unwrap();
        let mut alpha_ids: Vec<_> = alpha.iter().map(|r| r.run_id.clone()).collect();
        alpha_ids.sort();
        let mut expected = vec![a_id.clone(), c_id.clone()];
        expected.sort();
        assert_eq!(alpha_ids, expected, "{name}");

        let failed = store
            .list_runs(&RunFilter::default().with_status(RunStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1, "{name}");
        assert_eq!(failed[0].run_id, b_id, "{name}");

        let by_def = store
            .list_runs(
                &RunFilter::default()
                    .with_definition_digest(ContentDigest::from_bytes(b"def-b"))
                    .with_status(RunStatus::Started),
            )
            .await
            .unwrap();
        assert_eq!(by_def.len(), 1, "{name}");
        assert_eq!(by_def[0].run_id, c_id, "{name}");
    }
}
