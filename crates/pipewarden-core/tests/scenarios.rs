use std::sync::Arc;

use pipewarden_core::fakes::{ScriptedReasoningBackend, ScriptedToolAdapter};
use pipewarden_core::{
    ChangedFile, EntryKind, GateRule, Issue, Orchestrator, OrchestratorConfig, PipelineMetadata,
    PipelineTarget, PlannerKind, Review, RiskLevel, RunStatus, Severity, StartRunRequest, ToolId,
    ToolOutput, ToolRegistry, Verdict, METRICS,
};
use pipewarden_state::fakes::MemoryRunStateStore;
use pipewarden_state::RunStateStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request(definition: &str, files: &[&str]) -> StartRunRequest {
    StartRunRequest {
        target: PipelineTarget {
            repository: "org/app".to_string(),
            pipeline_path: ".github/workflows/ci.yml".to_string(),
            branch: "main".to_string(),
            commit: Some("4f1c2a9".to_string()),
        },
        trigger_source: "pull_request".to_string(),
        correlation_id: None,
        metadata: PipelineMetadata {
            definition: definition.to_string(),
            changed_files: files.iter().map(|f| ChangedFile::from(*f)).collect(),
            target_branch: "main".to_string(),
            default_branch: None,
        },
    }
}

const PR_WORKFLOW: &str = "on:\n  pull_request:\n    branches: [main]\njobs:\n  build:\n    runs-on: ubuntu-latest\n";

fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.executor.backoff_base_ms = 1;
    config
}

fn orchestrator(
    store: Arc<MemoryRunStateStore>,
    adapter: Arc<ScriptedToolAdapter>,
    backend: Option<Arc<ScriptedReasoningBackend>>,
) -> Orchestrator {
    let mut builder =
        Orchestrator::builder(store, ToolRegistry::uniform(adapter)).with_config(fast_config());
    if let Some(backend) = backend {
        builder = builder.with_reasoning_backend(backend);
    }
    builder.build().expect("build orchestrator")
}

fn reply(tool: &str) -> String {
    format!(r#"{{"tool": "{tool}", "action": "run", "rationale": "next step", "confidence": 0.8}}"#)
}

fn high_risk_adapter() -> ScriptedToolAdapter {
    ScriptedToolAdapter::new()
        .with_output(
            ToolId::Optimise,
            ToolOutput::default().with_issues(vec![Issue::new(
                "cache",
                "dependency cache missing",
                Severity::Medium,
            )
            .at("jobs.build")]),
        )
        .with_output(ToolId::Critic, ToolOutput::default().with_review(Review::critic(0.8)))
        .with_output(
            ToolId::Resolve,
            ToolOutput::artifact(serde_json::json!({"pr_reference": "org/app#42"})),
        )
}

fn medium_risk_adapter(merge: f64) -> ScriptedToolAdapter {
    ScriptedToolAdapter::new()
        .with_output(
            ToolId::Optimise,
            ToolOutput::default().with_issues(vec![Issue::new(
                "timeout",
                "job has no timeout",
                Severity::Low,
            )]),
        )
        .with_output(ToolId::Critic, ToolOutput::default().with_review(Review::critic(merge)))
}

// ---------------------------------------------------------------------------
// Rule-based planning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn high_risk_infrastructure_run_follows_policy_order() {
    let store = Arc::new(MemoryRunStateStore::new());
    let adapter = Arc::new(high_risk_adapter());
    let orch = orchestrator(store.clone(), adapter.clone(), None);

    let outcome = orch
        .run(request(PR_WORKFLOW, &["infra/main.tf"]))
        .await
        .expect("run");

    assert!(outcome.is_completed(), "cause: {:?}", outcome.cause);
    assert_eq!(
        outcome.profile.as_ref().map(|p| p.risk_level),
        Some(RiskLevel::High)
    );
    assert_eq!(
        outcome.executed_tools(),
        vec![
            ToolId::Ingest,
            ToolId::Validate,
            ToolId::Optimise,
            ToolId::Validate,
            ToolId::Critic,
            ToolId::RiskAssess,
            ToolId::SecurityScan,
            ToolId::Resolve,
        ]
    );
    assert_eq!(outcome.pr_reference(), Some("org/app#42"));
    assert!(outcome
        .decisions()
        .iter()
        .all(|d| d.planner == PlannerKind::RuleBased && d.verdict == Verdict::Allow));
    assert!(outcome.history.unresolved_decisions().is_empty());

    let record = store.get_run(&outcome.run_id).await.expect("get_run");
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.total_entries, outcome.history.len() as u64);
    assert!(METRICS.snapshot().runs_completed >= 1);
}

#[tokio::test]
async fn low_risk_docs_run_never_scans() {
    let store = Arc::new(MemoryRunStateStore::new());
    let adapter = Arc::new(ScriptedToolAdapter::new());
    let orch = orchestrator(store, adapter.clone(), None);

    let outcome = orch
        .run(request(PR_WORKFLOW, &["README.md", "docs/setup.md"]))
        .await
        .expect("run");

    assert!(outcome.is_completed());
    assert_eq!(
        outcome.executed_tools(),
        vec![
            ToolId::Ingest,
            ToolId::Validate,
            ToolId::Optimise,
            ToolId::Validate,
            ToolId::Critic,
        ]
    );
    assert_eq!(adapter.call_count(ToolId::SecurityScan), 0);
    assert_eq!(adapter.call_count(ToolId::Resolve), 0);
}

#[tokio::test]
async fn low_merge_confidence_completes_without_pull_request() {
    let store = Arc::new(MemoryRunStateStore::new());
    let adapter = Arc::new(medium_risk_adapter(0.42));
    let orch = orchestrator(store, adapter.clone(), None);

    let outcome = orch
        .run(request(PR_WORKFLOW, &["src/main.rs"]))
        .await
        .expect("run");

    assert!(outcome.is_completed());
    assert_eq!(
        outcome.profile.as_ref().map(|p| p.risk_level),
        Some(RiskLevel::Medium)
    );
    assert!(outcome.executed_tools().contains(&ToolId::SecurityScan));
    assert_eq!(adapter.call_count(ToolId::Resolve), 0);
    assert_eq!(outcome.pr_reference(), None);

    let last = outcome.decisions().pop().cloned().expect("a decision");
    assert!(last.proposal.choice.is_complete());
    assert!((last.proposal.confidence - 0.58).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Reasoning planner under the gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gate_forces_security_scan_the_backend_left_out() {
    let store = Arc::new(MemoryRunStateStore::new());
    let adapter = Arc::new(high_risk_adapter());
    let backend = Arc::new(ScriptedReasoningBackend::new(
        [
            "ingest",
            "validate",
            "optimise",
            "validate",
            "critic",
            "risk_assess",
            "resolve",
            "resolve",
            "complete",
        ]
        .map(reply),
    ));
    let orch = orchestrator(store, adapter.clone(), Some(backend.clone()));

    let outcome = orch
        .run(request(PR_WORKFLOW, &["terraform/network.tf"]))
        .await
        .expect("run");

    assert!(outcome.is_completed(), "cause: {:?}", outcome.cause);
    assert_eq!(backend.requests(), 9);

    let overrides: Vec<_> = outcome
        .decisions()
        .into_iter()
        .filter_map(|d| match &d.verdict {
            Verdict::Override { tool, rule, .. } => Some((d.proposal.choice.tool(), *tool, *rule)),
            _ => None,
        })
        .collect();
    assert_eq!(
        overrides,
        vec![(
            Some(ToolId::Resolve),
            ToolId::SecurityScan,
            GateRule::HighRiskSecurityScan
        )]
    );

    let executed = outcome.executed_tools();
    let scan = executed.iter().position(|t| *t == ToolId::SecurityScan);
    let resolve = executed.iter().position(|t| *t == ToolId::Resolve);
    assert!(scan.is_some() && scan < resolve);
    assert!(outcome
        .decisions()
        .iter()
        .all(|d| d.planner == PlannerKind::Reasoning));
    assert!(METRICS.snapshot().gate_overrides >= 1);
}

#[tokio::test]
async fn gate_blocks_resolve_below_merge_threshold() {
    let store = Arc::new(MemoryRunStateStore::new());
    let adapter = Arc::new(medium_risk_adapter(0.42));
    let backend = Arc::new(ScriptedReasoningBackend::new(
        [
            "ingest",
            "validate",
            "optimise",
            "validate",
            "critic",
            "security_scan",
            "resolve",
            "complete",
        ]
        .map(reply),
    ));
    let orch = orchestrator(store, adapter.clone(), Some(backend));

    let outcome = orch
        .run(request(PR_WORKFLOW, &["src/lib.rs"]))
        .await
        .expect("run");

    assert!(outcome.is_completed());
    assert_eq!(adapter.call_count(ToolId::Resolve), 0);
    assert_eq!(adapter.call_count(ToolId::Critic), 2);

    let rules: Vec<GateRule> = outcome
        .decisions()
        .into_iter()
        .filter_map(|d| match &d.verdict {
            Verdict::Override { rule, .. } => Some(*rule),
            _ => None,
        })
        .collect();
    assert_eq!(rules, vec![GateRule::LowMergeConfidence]);
}

#[tokio::test]
async fn unparsable_backend_falls_back_to_policy_order() {
    let store = Arc::new(MemoryRunStateStore::new());
    let adapter = Arc::new(ScriptedToolAdapter::new());
    let backend = Arc::new(ScriptedReasoningBackend::new(["I would validate first."]));
    let orch = orchestrator(store, adapter, Some(backend));

    let outcome = orch
        .run(request(PR_WORKFLOW, &["README.md"]))
        .await
        .expect("run");

    assert!(outcome.is_completed());
    let decisions = outcome.decisions();
    assert_eq!(decisions[0].proposal.choice.tool(), Some(ToolId::Ingest));
    assert!(decisions
        .iter()
        .all(|d| d.planner == PlannerKind::Fallback && d.proposal.confidence == 0.0));

    let anomalies = outcome
        .history
        .entries()
        .iter()
        .filter(|e| matches!(e.entry, EntryKind::Anomaly { .. }))
        .count();
    assert_eq!(anomalies, decisions.len());
    assert!(METRICS.snapshot().planner_fallbacks >= anomalies as u64);
}
