use std::sync::Arc;

use pipewarden_core::fakes::{ScriptedOutcome, ScriptedToolAdapter};
use pipewarden_core::{
    evaluate_safety_gate, Action, ActionResult, ChangeScope, ChangedFile, Decision, EntryKind,
    FailureCause, Issue, Orchestrator, OrchestratorConfig, PipelineMetadata, PipelineTarget,
    PlannerKind, Proposal, Resolution, Review, RiskLevel, RunHistory, RunState, RunStatus,
    Severity, StartRunRequest, ToolId, ToolOutput, ToolRegistry, Verdict,
    WorkflowProfile, WorkflowType,
};
use pipewarden_state::fakes::MemoryRunStateStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SCOPES: [(ChangeScope, RiskLevel); 5] = [
    (ChangeScope::DocsOnly, RiskLevel::Low),
    (ChangeScope::Code, RiskLevel::Medium),
    (ChangeScope::Infrastructure, RiskLevel::High),
    (ChangeScope::Deployment, RiskLevel::High),
    (ChangeScope::DocsOnly, RiskLevel::High),
];

fn random_output(rng: &mut StdRng, tool: ToolId) -> ToolOutput {
    match tool {
        ToolId::Optimise => {
            let issues = (0..rng.gen_range(0..3))
                .map(|i| {
                    let issue = Issue::new("finding", format!("finding {i}"), Severity::Low);
                    if rng.gen_bool(0.5) {
                        issue.with_fix("apply suggestion")
                    } else {
                        issue
                    }
                })
                .collect();
            ToolOutput::default().with_issues(issues)
        }
        ToolId::Critic => {
            ToolOutput::default().with_review(Review::critic(rng.gen_range(0..=10) as f64 / 10.0))
        }
        _ => ToolOutput::default(),
    }
}

/// A state reached by a random sequence of tool results.
fn random_state(rng: &mut StdRng, profile: &WorkflowProfile) -> RunState {
    let mut history = RunHistory::new();
    history.append(EntryKind::ProfileAssigned {
        profile: profile.clone(),
    });
    for _ in 0..rng.gen_range(0..10) {
        let tool = ToolId::ALL[rng.gen_range(0..ToolId::ALL.len())];
        let seq = history
            .append(EntryKind::DecisionRecorded {
                decision: Decision {
                    proposal: Proposal::run(tool, "random", 0.5),
                    planner: PlannerKind::RuleBased,
                    verdict: Verdict::Allow,
                },
            })
            .seq;
        let success = rng.gen_bool(0.8);
        history.append(EntryKind::DecisionResolved {
            decision_seq: seq,
            resolution: Resolution::Executed {
                result: ActionResult {
                    tool,
                    success,
                    duration_ms: 1,
                    attempts: 1,
                    timed_out: false,
                    output: success.then(|| random_output(rng, tool)),
                    error: (!success).then(|| "exit 1".to_string()),
                },
            },
        });
    }
    RunState::replay(history.entries())
}

fn random_proposal(rng: &mut StdRng) -> Proposal {
    if rng.gen_bool(0.2) {
        return Proposal::complete("done", 0.9);
    }
    let tool = ToolId::ALL[rng.gen_range(0..ToolId::ALL.len())];
    if rng.gen_bool(0.3) {
        Proposal::skip(tool, "not needed", 0.6)
    } else {
        Proposal::run(tool, "next", 0.6)
    }
}

// ---------------------------------------------------------------------------
// Safety gate
// ---------------------------------------------------------------------------

#[test]
fn gate_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..500 {
        let (scope, risk) = SCOPES[rng.gen_range(0..SCOPES.len())];
        let profile = WorkflowProfile::new(WorkflowType::Ci, scope, risk);
        let state = random_state(&mut rng, &profile);
        let proposal = random_proposal(&mut rng);

        let first = evaluate_safety_gate(&state, &profile, &proposal);
        let again = evaluate_safety_gate(&state.clone(), &profile, &proposal.clone());
        assert_eq!(first, again);
    }
}

#[test]
fn gate_never_allows_unsafe_steps() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..2000 {
        let (scope, risk) = SCOPES[rng.gen_range(0..SCOPES.len())];
        let profile = WorkflowProfile::new(WorkflowType::Ci, scope, risk);
        let state = random_state(&mut rng, &profile);
        let proposal = random_proposal(&mut rng);
        let verdict = evaluate_safety_gate(&state, &profile, &proposal);
        let high = risk == RiskLevel::High;
        let scanned = state.has_completed(ToolId::SecurityScan);

        match &verdict {
            Verdict::Allow => {
                if proposal.choice.is_complete() {
                    assert!(state.missing_mandatory(&profile.policy).is_empty());
                    assert!(!high || scanned);
                }
                if proposal.runs(ToolId::Resolve) {
                    assert!(state.has_completed(ToolId::Validate));
                    assert!(state.latest_merge_confidence().is_some_and(|m| m >= 0.5));
                    assert!(!high || scanned);
                }
                if proposal.runs(ToolId::Fix) {
                    assert!(state.has_completed(ToolId::Validate));
                    assert!(state.has_completed(ToolId::Optimise));
                }
                if proposal.skips(ToolId::SecurityScan) {
                    assert!(!high || scanned);
                }
            }
            Verdict::Override { tool, .. } => {
                assert!(matches!(
                    tool,
                    ToolId::Validate | ToolId::Optimise | ToolId::SecurityScan | ToolId::Critic
                ));
                assert!(!proposal.runs(*tool));
            }
            Verdict::BlockComplete { missing } => {
                assert!(proposal.choice.is_complete());
                assert!(!missing.is_empty());
                assert_eq!(missing, &state.missing_mandatory(&profile.policy));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Whole runs
// ---------------------------------------------------------------------------

fn request(files: &[&str]) -> StartRunRequest {
    StartRunRequest {
        target: PipelineTarget {
            repository: "org/app".to_string(),
            pipeline_path: ".github/workflows/ci.yml".to_string(),
            branch: "main".to_string(),
            commit: None,
        },
        trigger_source: "push".to_string(),
        correlation_id: Some("10000001".to_string()),
        metadata: PipelineMetadata {
            definition: "on: [push, pull_request]\njobs: {}\n".to_string(),
            changed_files: files.iter().map(|f| ChangedFile::from(*f)).collect(),
            target_branch: "feature/x".to_string(),
            default_branch: Some("main".to_string()),
        },
    }
}

fn random_adapter(rng: &mut StdRng) -> ScriptedToolAdapter {
    let mut adapter = ScriptedToolAdapter::new();
    for tool in ToolId::ALL {
        for _ in 0..4 {
            let outcome = match rng.gen_range(0..10) {
                0 => ScriptedOutcome::Rejected {
                    message: format!("{tool} refused input"),
                },
                1 => ScriptedOutcome::Transient {
                    message: "rate limited".to_string(),
                },
                _ => ScriptedOutcome::ok(random_output(rng, tool)),
            };
            adapter = adapter.with_outcome(tool, outcome);
        }
    }
    adapter
}

#[tokio::test]
async fn every_run_terminates_with_a_sound_outcome() {
    let files: [&[&str]; 4] = [
        &["README.md"],
        &["src/main.rs"],
        &["infra/main.tf"],
        &["deploy/app.yaml", "src/lib.rs"],
    ];
    let mut config = OrchestratorConfig::default();
    config.executor.backoff_base_ms = 0;
    config.executor.max_retries = 1;

    for seed in 0..24u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let adapter = Arc::new(random_adapter(&mut rng));
        let orch = Orchestrator::builder(
            Arc::new(MemoryRunStateStore::new()),
            ToolRegistry::uniform(adapter),
        )
        .with_config(config.clone())
        .build()
        .expect("build");

        let outcome = orch
            .run(request(files[seed as usize % files.len()]))
            .await
            .expect("run");
        let profile = outcome.profile.clone().expect("profiled");
        let cap = profile.iteration_cap(config.iteration_margin);

        assert!(outcome.decisions().len() as u32 <= cap + 1, "seed {seed}");
        for (i, entry) in outcome.history.entries().iter().enumerate() {
            assert_eq!(entry.seq, i as u64 + 1, "seed {seed}");
        }
        assert!(outcome.history.unresolved_decisions().is_empty(), "seed {seed}");

        match outcome.status {
            RunStatus::Completed => {
                let completed = outcome.completed_tools();
                for tool in &profile.policy.mandatory {
                    assert!(completed.contains(tool), "seed {seed}: {tool} missing");
                }
                if profile.risk_level == RiskLevel::High {
                    assert!(completed.contains(&ToolId::SecurityScan), "seed {seed}");
                }
                assert!(outcome.cause.is_none());
            }
            RunStatus::Failed => assert!(
                matches!(
                    outcome.cause,
                    Some(FailureCause::MandatoryToolFailed { .. })
                        | Some(FailureCause::IterationCapExceeded { .. })
                ),
                "seed {seed}: {:?}",
                outcome.cause
            ),
            RunStatus::Started => panic!("seed {seed}: run left open"),
        }

        for decision in outcome.decisions() {
            if decision.proposal.action == Action::Skip {
                assert!(!profile.policy.is_mandatory(
                    decision.proposal.choice.tool().expect("skip names a tool")
                ));
            }
        }
    }
}
