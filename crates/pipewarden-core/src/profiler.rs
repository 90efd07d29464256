//! Workflow classification.
//!
//! [`WorkflowProfiler`] turns [`PipelineMetadata`] into a [`WorkflowProfile`]:
//! - workflow type from the declared triggers (`on:` key)
//! - change scope from path markers in the diff summary
//! - risk level as an escalating fold over every observed marker
//!
//! The execution policy follows from the risk level.

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::domain::{
    ChangeScope, ChangedFile, PipelineMetadata, RiskLevel, WorkflowProfile, WorkflowType,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfilingError {
    #[error("pipeline definition is empty")]
    Empty,

    #[error("pipeline definition is not valid YAML: {0}")]
    Malformed(String),

    #[error("pipeline definition must be a mapping at the top level")]
    NotAMapping,

    #[error("pipeline definition declares no triggers (missing `on` key)")]
    MissingTriggers,

    #[error("invalid marker pattern: {0}")]
    InvalidMarkerPattern(String),
}

// ---------------------------------------------------------------------------
// Marker patterns
// ---------------------------------------------------------------------------

/// Regular expressions matched against changed-file paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerPatterns {
    pub docs: Vec<String>,
    pub deployment: Vec<String>,
    pub infrastructure: Vec<String>,
    pub secrets: Vec<String>,
    /// Matched against the pipeline definition text.
    pub secret_reference: String,
}

impl Default for MarkerPatterns {
    fn default() -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            docs: owned(&[
                r"(?i)\.(md|rst|txt|adoc)$",
                r"(^|/)docs/",
                r"(^|/)(LICENSE|CHANGELOG)[^/]*$",
            ]),
            deployment: owned(&[
                r"(^|/)(deploy|k8s|kubernetes|helm|charts|manifests)/",
                r"(^|/)(Chart|kustomization|skaffold)\.ya?ml$",
                r"\.deploy\.ya?ml$",
            ]),
            infrastructure: owned(&[
                r"\.(tf|tfvars)$",
                r"(^|/)(terraform|infra|cloudformation|pulumi|ansible)/",
                r"(^|/)Dockerfile[^/]*$",
                r"(^|/)docker-compose[^/]*\.ya?ml$",
            ]),
            secrets: owned(&[r"(^|/)secrets/", r"(^|/)\.env[^/]*$", r"\.(pem|key)$"]),
            secret_reference: r"\bsecrets\.[A-Za-z_]".to_string(),
        }
    }
}

fn compile_set(patterns: &[String]) -> Result<RegexSet, ProfilingError> {
    RegexSet::new(patterns).map_err(|e| ProfilingError::InvalidMarkerPattern(e.to_string()))
}

// ---------------------------------------------------------------------------
// Profiler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkflowProfiler {
    docs: RegexSet,
    deployment: RegexSet,
    infrastructure: RegexSet,
    secrets: RegexSet,
    secret_reference: Regex,
}

/// Per-diff marker tally.
#[derive(Debug, Default)]
struct ScopeScan {
    files: usize,
    docs: usize,
    deployment: bool,
    infrastructure: bool,
    secret: bool,
    markers: Vec<String>,
}

impl WorkflowProfiler {
    pub fn new() -> Result<Self, ProfilingError> {
        Self::with_patterns(&MarkerPatterns::default())
    }

    pub fn with_patterns(patterns: &MarkerPatterns) -> Result<Self, ProfilingError> {
        Ok(Self {
            docs: compile_set(&patterns.docs)?,
            deployment: compile_set(&patterns.deployment)?,
            infrastructure: compile_set(&patterns.infrastructure)?,
            secrets: compile_set(&patterns.secrets)?,
            secret_reference: Regex::new(&patterns.secret_reference)
                .map_err(|e| ProfilingError::InvalidMarkerPattern(e.to_string()))?,
        })
    }

    /// Classify a pending run.
    pub fn profile(&self, metadata: &PipelineMetadata) -> Result<WorkflowProfile, ProfilingError> {
        let workflow_type = self.classify_workflow(&metadata.definition, metadata.default_branch())?;
        let mut scan = self.scan_files(&metadata.changed_files);
        if self.secret_reference.is_match(&metadata.definition) {
            scan.secret = true;
            scan.markers.push("secret:definition".to_string());
        }

        let scope = scan.scope();
        let risk = [
            scope_risk(scope),
            if scan.secret { RiskLevel::High } else { RiskLevel::Low },
        ]
        .into_iter()
        .fold(RiskLevel::Low, RiskLevel::escalate);

        let mut profile = WorkflowProfile::new(workflow_type, scope, risk);
        profile.markers = scan.markers;
        Ok(profile)
    }

    /// Workflow type from the definition's trigger declaration.
    pub fn classify_workflow(
        &self,
        definition: &str,
        default_branch: &str,
    ) -> Result<WorkflowType, ProfilingError> {
        if definition.trim().is_empty() {
            return Err(ProfilingError::Empty);
        }
        let doc: Value = serde_yaml::from_str(definition)
            .map_err(|e| ProfilingError::Malformed(e.to_string()))?;
        let root = doc.as_mapping().ok_or(ProfilingError::NotAMapping)?;
        let triggers = trigger_value(root).ok_or(ProfilingError::MissingTriggers)?;

        let events = trigger_events(triggers);
        let reviews_changes = events
            .iter()
            .any(|(event, _)| matches!(event.as_str(), "pull_request" | "pull_request_target"));

        // Push plus pull_request is the CI pattern even when the push targets
        // the default branch.
        let matched = events
            .into_iter()
            .filter_map(|(event, config)| classify_event(&event, config, default_branch))
            .map(|t| match t {
                WorkflowType::Cd if reviews_changes => WorkflowType::Ci,
                other => other,
            })
            .max_by_key(WorkflowType::specificity);
        Ok(matched.unwrap_or(WorkflowType::Ci))
    }

    /// Change scope plus the markers that drove it.
    pub fn classify_scope(&self, files: &[ChangedFile]) -> (ChangeScope, Vec<String>) {
        let scan = self.scan_files(files);
        (scan.scope(), scan.markers)
    }

    fn scan_files(&self, files: &[ChangedFile]) -> ScopeScan {
        let mut scan = ScopeScan::default();
        for file in files {
            let path = file.path.as_str();
            scan.files += 1;
            if self.secrets.is_match(path) {
                scan.secret = true;
                scan.markers.push(format!("secret:{path}"));
            }
            if file.comment_only || self.docs.is_match(path) {
                scan.docs += 1;
                continue;
            }
            if self.deployment.is_match(path) {
                scan.deployment = true;
                scan.markers.push(format!("deployment:{path}"));
            }
            if self.infrastructure.is_match(path) {
                scan.infrastructure = true;
                scan.markers.push(format!("infrastructure:{path}"));
            }
        }
        scan
    }
}

impl ScopeScan {
    fn scope(&self) -> ChangeScope {
        if self.files > 0 && self.docs == self.files {
            ChangeScope::DocsOnly
        } else if self.deployment {
            ChangeScope::Deployment
        } else if self.infrastructure || self.secret {
            ChangeScope::Infrastructure
        } else {
            ChangeScope::Code
        }
    }
}

fn scope_risk(scope: ChangeScope) -> RiskLevel {
    match scope {
        ChangeScope::DocsOnly => RiskLevel::Low,
        ChangeScope::Code => RiskLevel::Medium,
        ChangeScope::Infrastructure | ChangeScope::Deployment => RiskLevel::High,
    }
}

// ---------------------------------------------------------------------------
// Trigger parsing
// ---------------------------------------------------------------------------

/// The `on` key. YAML 1.1 readers turn a bare `on` into `true`.
fn trigger_value(root: &Mapping) -> Option<&Value> {
    root.get(Value::String("on".into()))
        .or_else(|| root.get(Value::Bool(true)))
}

/// Normalise the three accepted shapes into `(event, config)` pairs.
fn trigger_events(triggers: &Value) -> Vec<(String, Option<&Value>)> {
    match triggers {
        Value::String(event) => vec![(event.clone(), None)],
        Value::Sequence(events) => events
            .iter()
            .filter_map(|e| e.as_str().map(|s| (s.to_string(), None)))
            .collect(),
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|s| (s.to_string(), Some(v))))
            .collect(),
        _ => Vec::new(),
    }
}

fn classify_event(event: &str, config: Option<&Value>, default_branch: &str) -> Option<WorkflowType> {
    match event {
        "release" | "create" => Some(WorkflowType::Release),
        "push" => {
            if filter_patterns(config, "tags").is_some() {
                Some(WorkflowType::Release)
            } else if filter_patterns(config, "branches")
                .is_some_and(|branches| branches.iter().any(|p| glob_matches(p, default_branch)))
            {
                Some(WorkflowType::Cd)
            } else {
                Some(WorkflowType::Ci)
            }
        }
        "pull_request" | "pull_request_target" => Some(WorkflowType::Ci),
        "schedule" => Some(WorkflowType::Scheduled),
        _ => None,
    }
}

fn filter_patterns(config: Option<&Value>, key: &str) -> Option<Vec<String>> {
    let value = config?.as_mapping()?.get(Value::String(key.into()))?;
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Sequence(items) => Some(
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

/// Branch-filter glob: `**` spans `/`, `*` does not, `?` is one character.
fn glob_matches(pattern: &str, branch: &str) -> bool {
    if pattern.starts_with('!') {
        return false;
    }
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).is_ok_and(|r| r.is_match(branch))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiler() -> WorkflowProfiler {
        WorkflowProfiler::new().unwrap()
    }

    fn metadata(definition: &str, files: &[&str]) -> PipelineMetadata {
        PipelineMetadata {
            definition: definition.to_string(),
            changed_files: files.iter().map(|f| ChangedFile::from(*f)).collect(),
            target_branch: "main".to_string(),
            default_branch: None,
        }
    }

    const CI: &str = "on: [push, pull_request]\njobs:\n  test:\n    runs-on: ubuntu-latest\n";

    #[test]
    fn test_trigger_precedence() {
        let p = profiler();
        let release = "on:\n  push:\n    tags: ['v*']\n  pull_request: {}\n";
        assert_eq!(p.classify_workflow(release, "main").unwrap(), WorkflowType::Release);

        let cd = "on:\n  push:\n    branches: [main]\n";
        assert_eq!(p.classify_workflow(cd, "main").unwrap(), WorkflowType::Cd);
        assert_eq!(p.classify_workflow(cd, "trunk").unwrap(), WorkflowType::Ci);

        let cron = "on:\n  schedule:\n    - cron: '0 3 * * *'\n";
        assert_eq!(p.classify_workflow(cron, "main").unwrap(), WorkflowType::Scheduled);

        assert_eq!(p.classify_workflow(CI, "main").unwrap(), WorkflowType::Ci);
        assert_eq!(
            p.classify_workflow("on: workflow_dispatch\n", "main").unwrap(),
            WorkflowType::Ci
        );
    }

    #[test]
    fn test_push_with_pull_request_is_ci() {
        let p = profiler();
        let both = "on:\n  push:\n    branches: [main]\n  pull_request:\n    branches: [main]\njobs:\n  test:\n    runs-on: ubuntu-latest\n    steps:\n      - run: cargo test\n";
        assert_eq!(p.classify_workflow(both, "main").unwrap(), WorkflowType::Ci);

        let target = "on:\n  push:\n    branches: [main]\n  pull_request_target: {}\n";
        assert_eq!(p.classify_workflow(target, "main").unwrap(), WorkflowType::Ci);

        let tagged = "on:\n  push:\n    branches: [main]\n    tags: ['v*']\n  pull_request: {}\n";
        assert_eq!(p.classify_workflow(tagged, "main").unwrap(), WorkflowType::Release);
    }

    #[test]
    fn test_branch_globs() {
        assert!(glob_matches("main", "main"));
        assert!(glob_matches("rel*", "release"));
        assert!(!glob_matches("release/*", "release/v1/hotfix"));
        assert!(glob_matches("release/**", "release/v1/hotfix"));
        assert!(!glob_matches("!main", "main"));
    }

    #[test]
    fn test_malformed_definitions() {
        let p = profiler();
        assert_eq!(p.classify_workflow("  \n", "main"), Err(ProfilingError::Empty));
        assert!(matches!(
            p.classify_workflow("on: [push\n", "main"),
            Err(ProfilingError::Malformed(_))
        ));
        assert_eq!(p.classify_workflow("- a\n- b\n", "main"), Err(ProfilingError::NotAMapping));
        assert_eq!(
            p.classify_workflow("jobs: {}\n", "main"),
            Err(ProfilingError::MissingTriggers)
        );
    }

    #[test]
    fn test_docs_only_change_is_low_risk() {
        let profile = profiler()
            .profile(&metadata(CI, &["README.md", "docs/guide/setup.rst"]))
            .unwrap();
        assert_eq!(profile.change_scope, ChangeScope::DocsOnly);
        assert_eq!(profile.risk_level, RiskLevel::Low);
        assert!(profile.policy.optional.is_empty());
    }

    #[test]
    fn test_comment_only_change_counts_as_docs() {
        let mut meta = metadata(CI, &[]);
        meta.changed_files.push(ChangedFile {
            path: "src/lib.rs".into(),
            comment_only: true,
        });
        assert_eq!(profiler().profile(&meta).unwrap().change_scope, ChangeScope::DocsOnly);
    }

    #[test]
    fn test_code_change_is_medium_risk() {
        let profile = profiler().profile(&metadata(CI, &["src/main.rs", "README.md"])).unwrap();
        assert_eq!(profile.change_scope, ChangeScope::Code);
        assert_eq!(profile.risk_level, RiskLevel::Medium);
        assert!(profile.markers.is_empty());
    }

    #[test]
    fn test_deployment_beats_infrastructure() {
        let profile = profiler()
            .profile(&metadata(CI, &["terraform/main.tf", "k8s/deployment.yaml"]))
            .unwrap();
        assert_eq!(profile.change_scope, ChangeScope::Deployment);
        assert_eq!(profile.risk_level, RiskLevel::High);
        assert_eq!(profile.markers.len(), 2);

        let infra = profiler().profile(&metadata(CI, &["Dockerfile"])).unwrap();
        assert_eq!(infra.change_scope, ChangeScope::Infrastructure);
    }

    #[test]
    fn test_secret_reference_escalates_docs_change() {
        let definition = "on: push\njobs:\n  pub:\n    steps:\n      - run: echo ${{ secrets.TOKEN }}\n";
        let profile = profiler().profile(&metadata(definition, &["README.md"])).unwrap();
        assert_eq!(profile.change_scope, ChangeScope::DocsOnly);
        assert_eq!(profile.risk_level, RiskLevel::High);
        assert!(profile.markers.contains(&"secret:definition".to_string()));
    }

    #[test]
    fn test_empty_diff_is_code() {
        let profile = profiler().profile(&metadata(CI, &[])).unwrap();
        assert_eq!(profile.change_scope, ChangeScope::Code);
    }

    #[test]
    fn test_invalid_custom_pattern() {
        let patterns = MarkerPatterns {
            docs: vec!["(unclosed".into()],
            ..MarkerPatterns::default()
        };
        assert!(matches!(
            WorkflowProfiler::with_patterns(&patterns),
            Err(ProfilingError::InvalidMarkerPattern(_))
        ));
    }
}
