//! Pipewarden CLI
//!
//! The `pipewarden` command drives the orchestration core from the shell.
//!
//! ## Commands
//!
//! - `profile`: classify a pipeline and print its workflow profile
//! - `dry-run`: run the loop against scripted tool outputs
//! - `runs`: list stored runs
//! - `history`: print a stored run's audit trail

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pipewarden_core::fakes::{registry_from_script, ToolScript};
use pipewarden_core::{
    load_run, Action, EntryKind, HistoryEntry, Orchestrator, OrchestratorConfig,
    PipelineMetadata, PipelineTarget, Resolution, RunHistory, RunOutcome, StartRunRequest,
    Verdict, WorkflowProfile, WorkflowProfiler,
};
use pipewarden_core::{init_tracing, LogFormat};
use pipewarden_state::fakes::MemoryRunStateStore;
use pipewarden_state::{RunFilter, RunId, RunRecord, RunStateStore, RunStatus, SurrealRunStateStore};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "pipewarden")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Risk-aware orchestration of pipeline-improvement runs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a pipeline and print its workflow profile as JSON
    Profile {
        /// Start-run request or bare pipeline metadata (JSON or YAML)
        metadata: PathBuf,
    },

    /// Run the improvement loop with the rule-based planner and scripted tools
    DryRun {
        /// Start-run request or bare pipeline metadata (JSON or YAML)
        metadata: PathBuf,

        /// Scripted tool outcomes, keyed by tool id (JSON or YAML)
        #[arg(short, long)]
        outputs: Option<PathBuf>,

        /// Orchestrator settings (TOML); environment variables otherwise
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// SurrealDB endpoint to record the run in (in-memory when omitted)
        #[arg(long)]
        store: Option<String>,
    },

    /// List stored runs
    Runs {
        /// SurrealDB endpoint (falls back to SURREALDB_URL, then local persistence)
        #[arg(long)]
        store: Option<String>,

        /// Only runs with this status (started, completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Only runs against this repository
        #[arg(long)]
        repository: Option<String>,
    },

    /// Print the audit trail of a stored run
    History {
        /// Run ID
        run_id: String,

        /// SurrealDB endpoint (falls back to SURREALDB_URL, then local persistence)
        #[arg(long)]
        store: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format, level);

    match cli.command {
        Commands::Profile { metadata } => {
            let profile = cmd_profile(&metadata)?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        Commands::DryRun {
            metadata,
            outputs,
            config,
            store,
        } => {
            let store: Arc<dyn RunStateStore> = match store {
                Some(url) => connect(Some(&url)).await?,
                None => Arc::new(MemoryRunStateStore::new()),
            };
            let outcome =
                cmd_dry_run(store, &metadata, outputs.as_deref(), config.as_deref()).await?;
            print_outcome(&outcome);
            if let Some(cause) = &outcome.cause {
                bail!("run {} failed: {cause}", outcome.run_id);
            }
            Ok(())
        }
        Commands::Runs {
            store,
            status,
            repository,
        } => {
            let store = connect(store.as_deref()).await?;
            let runs = cmd_runs(store.as_ref(), status.as_deref(), repository).await?;
            if runs.is_empty() {
                println!("No runs found.");
            }
            for run in &runs {
                println!("{}", describe_run(run));
            }
            Ok(())
        }
        Commands::History { run_id, store } => {
            let store = connect(store.as_deref()).await?;
            let (record, history) = cmd_history(store.as_ref(), &run_id).await?;
            println!("{}", describe_run(&record));
            for entry in history.entries() {
                println!("{}", describe_entry(entry));
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_profile(metadata: &Path) -> Result<WorkflowProfile> {
    let request = load_request(metadata)?;
    let profiler = WorkflowProfiler::new()?;
    let profile = profiler
        .profile(&request.metadata)
        .with_context(|| format!("Failed to profile {}", metadata.display()))?;
    Ok(profile)
}

async fn cmd_dry_run(
    store: Arc<dyn RunStateStore>,
    metadata: &Path,
    outputs: Option<&Path>,
    config: Option<&Path>,
) -> Result<RunOutcome> {
    let request = load_request(metadata)?;
    let script: ToolScript = match outputs {
        Some(path) => load_document(path)?,
        None => ToolScript::default(),
    };
    let config = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            OrchestratorConfig::from_toml_str(&text)?
        }
        None => OrchestratorConfig::from_env()?,
    };

    info!(
        repository = %request.target.repository,
        scripted_tools = script.tools.len(),
        "Starting dry run"
    );
    let orchestrator = Orchestrator::builder(store, registry_from_script(script))
        .with_config(config)
        .build()?;
    Ok(orchestrator.run(request).await?)
}

async fn cmd_runs(
    store: &dyn RunStateStore,
    status: Option<&str>,
    repository: Option<String>,
) -> Result<Vec<RunRecord>> {
    let mut filter = RunFilter::default();
    if let Some(status) = status {
        filter = filter.with_status(status.parse::<RunStatus>()?);
    }
    if let Some(repository) = repository {
        filter = filter.with_repository(repository);
    }
    Ok(store.list_runs(&filter).await?)
}

async fn cmd_history(store: &dyn RunStateStore, run_id: &str) -> Result<(RunRecord, RunHistory)> {
    let run_id = RunId(run_id.to_string());
    let loaded = load_run(store, &run_id, OrchestratorConfig::default().store_timeout())
        .await
        .with_context(|| format!("Failed to load run {run_id}"))?;
    Ok(loaded)
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A metadata file holds either a full start-run request or just the
/// pipeline metadata.
#[derive(Deserialize)]
#[serde(untagged)]
enum MetadataFile {
    Request(StartRunRequest),
    Metadata(PipelineMetadata),
}

fn load_request(path: &Path) -> Result<StartRunRequest> {
    let request = match load_document(path)? {
        MetadataFile::Request(request) => request,
        MetadataFile::Metadata(metadata) => StartRunRequest {
            target: PipelineTarget {
                repository: "local".to_string(),
                pipeline_path: path.display().to_string(),
                branch: metadata.target_branch.clone(),
                commit: None,
            },
            trigger_source: "cli".to_string(),
            correlation_id: None,
            metadata,
        },
    };
    Ok(request)
}

/// JSON for `.json` files, YAML for everything else.
fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
    } else {
        serde_yaml::from_str(&text).with_context(|| format!("Invalid YAML in {}", path.display()))
    }
}

async fn connect(url: Option<&str>) -> Result<Arc<dyn RunStateStore>> {
    let store = match url {
        Some(url) => SurrealRunStateStore::connect(url)
            .await
            .with_context(|| format!("Failed to connect to {url}"))?,
        None => SurrealRunStateStore::from_env()
            .await
            .context("Failed to open the run store")?,
    };
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_outcome(outcome: &RunOutcome) {
    for entry in outcome.history.entries() {
        println!("{}", describe_entry(entry));
    }
    println!();
    println!("Run:         {}", outcome.run_id);
    println!("Correlation: {}", outcome.correlation_id);
    println!("Status:      {}", outcome.status);
    if let Some(cause) = &outcome.cause {
        println!("Cause:       {cause}");
    }
    if let Some(pr) = outcome.pr_reference() {
        println!("PR:          {pr}");
    }
}

fn describe_run(run: &RunRecord) -> String {
    let mut line = format!(
        "{}  {:<9} {:<11} {} {}",
        run.run_id, run.status, run.stage, run.target.repository, run.target.pipeline_path
    );
    if let Some(cause) = &run.cause {
        line.push_str(&format!("  ({cause})"));
    }
    line
}

fn describe_entry(entry: &HistoryEntry) -> String {
    let seq = entry.seq;
    match &entry.entry {
        EntryKind::ProfileAssigned { profile } => format!(
            "{seq:>3} profile   {:?} / {:?} / {:?} risk",
            profile.workflow_type, profile.change_scope, profile.risk_level
        ),
        EntryKind::DecisionRecorded { decision } => {
            let action = match decision.proposal.action {
                Action::Run => "run",
                Action::Skip => "skip",
            };
            let verdict = match &decision.verdict {
                Verdict::Override { tool, rule, .. } => format!("override -> {tool} ({rule:?})"),
                other => other.label().to_string(),
            };
            format!(
                "{seq:>3} decide    {action} {} [{:?}, {:.2}] {verdict}",
                decision.proposal.choice, decision.planner, decision.proposal.confidence
            )
        }
        EntryKind::DecisionResolved {
            decision_seq,
            resolution,
        } => {
            let detail = match resolution {
                Resolution::Executed { result } if result.success => format!(
                    "{} ok ({} attempt(s), {}ms)",
                    result.tool, result.attempts, result.duration_ms
                ),
                Resolution::Executed { result } => format!(
                    "{} failed: {}",
                    result.tool,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
                Resolution::Skipped { reason } => format!("skipped: {reason}"),
                Resolution::Blocked { reason } => format!("blocked: {reason}"),
                Resolution::Completed => "completed".to_string(),
            };
            format!("{seq:>3} resolve   #{decision_seq} {detail}")
        }
        EntryKind::Anomaly { message } => format!("{seq:>3} anomaly   {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewarden_core::{RiskLevel, ToolId};

    const REQUEST_YAML: &str = r#"
target:
  repository: org/app
  pipeline_path: .github/workflows/ci.yml
  branch: main
trigger_source: manual
metadata:
  definition: |
    on:
      pull_request:
        branches: [main]
    jobs: {}
  changed_files:
    - path: src/main.rs
  target_branch: main
"#;

    const OUTPUTS_YAML: &str = r#"
critic:
  - outcome: ok
    output:
      review:
        review_type: critic
        merge_confidence: 0.42
"#;

    #[test]
    fn test_profile_reads_bare_metadata_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(
            &path,
            r#"{"definition": "on: [push]\njobs: {}\n", "changed_files": [{"path": "infra/main.tf"}], "target_branch": "main"}"#,
        )
        .unwrap();

        let profile = cmd_profile(&path).unwrap();
        assert_eq!(profile.risk_level, RiskLevel::High);
        assert!(profile.policy.contains(ToolId::SecurityScan));
    }

    #[test]
    fn test_load_request_fills_target_for_bare_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.yaml");
        std::fs::write(
            &path,
            "definition: \"on: [push]\"\nchanged_files: []\ntarget_branch: develop\n",
        )
        .unwrap();

        let request = load_request(&path).unwrap();
        assert_eq!(request.target.repository, "local");
        assert_eq!(request.target.branch, "develop");
        assert_eq!(request.trigger_source, "cli");
    }

    #[test]
    fn test_load_document_reports_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yml");
        std::fs::write(&path, "target: [unclosed").unwrap();

        let err = load_request(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid YAML"));
    }

    #[tokio::test]
    async fn test_dry_run_records_run_and_lists_it() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = dir.path().join("request.yaml");
        let outputs = dir.path().join("outputs.yaml");
        let config = dir.path().join("pipewarden.toml");
        std::fs::write(&metadata, REQUEST_YAML).unwrap();
        std::fs::write(&outputs, OUTPUTS_YAML).unwrap();
        std::fs::write(&config, "[executor]\nbackoff_base_ms = 1\n").unwrap();

        let store = Arc::new(MemoryRunStateStore::new());
        let outcome = cmd_dry_run(store.clone(), &metadata, Some(&outputs), Some(&config))
            .await
            .unwrap();
        assert!(outcome.is_completed(), "cause: {:?}", outcome.cause);
        assert!(!outcome.executed_tools().contains(&ToolId::Resolve));

        let runs = cmd_runs(store.as_ref(), Some("completed"), Some("org/app".to_string()))
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert!(describe_run(&runs[0]).contains("completed"));
        assert!(cmd_runs(store.as_ref(), Some("failed"), None).await.unwrap().is_empty());

        let (record, history) = cmd_history(store.as_ref(), outcome.run_id.as_str())
            .await
            .unwrap();
        assert_eq!(record.run_id, outcome.run_id);
        assert_eq!(history.len(), outcome.history.len());
        assert!(describe_entry(&history.entries()[0]).contains("profile"));
    }

    #[tokio::test]
    async fn test_runs_rejects_unknown_status() {
        let store = MemoryRunStateStore::new();
        assert!(cmd_runs(&store, Some("paused"), None).await.is_err());
    }

    #[tokio::test]
    async fn test_history_of_unknown_run_fails() {
        let store = MemoryRunStateStore::new();
        assert!(cmd_history(&store, "no-such-run").await.is_err());
    }
}
