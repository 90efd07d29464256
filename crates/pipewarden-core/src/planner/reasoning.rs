//! Planner backed by an external reasoning engine.
//!
//! The backend receives a [`ReasoningRequest`] and answers with raw text that
//! should contain a JSON object:
//!
//! ```text
//! {"tool": "validate", "action": "run", "rationale": "...", "confidence": 0.8}
//! ```
//!
//! The object may sit inside a Markdown code fence anywhere in the reply, or
//! be embedded in surrounding prose.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Action, HistoryEntry, PlannerKind, Proposal, RunContext, RunState, ToolCatalog, ToolChoice,
    WorkflowProfile,
};

use super::{check_proposable, Planner, PlannerError, PlannerResult, PlanningInput};

const INSTRUCTIONS: &str = "Choose the next step of the pipeline-improvement run. \
Reply with one JSON object with the keys \"tool\" (a catalog tool id or \"complete\"), \
\"action\" (\"run\" or \"skip\"), \"rationale\" and \"confidence\" (0.0 to 1.0). \
Do not repeat completed tools unless their result is stale.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),
}

/// Payload sent to the reasoning backend.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest {
    pub run_id: String,
    pub correlation_id: String,
    pub instructions: String,
    pub profile: WorkflowProfile,
    pub state: RunState,
    pub history: Vec<HistoryEntry>,
    pub catalog: ToolCatalog,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Return the backend's raw reply.
    async fn complete(
        &self,
        ctx: &RunContext,
        request: &ReasoningRequest,
    ) -> Result<String, BackendError>;
}

pub struct ReasoningPlanner {
    backend: Arc<dyn ReasoningBackend>,
    timeout: Duration,
}

impl ReasoningPlanner {
    pub fn new(backend: Arc<dyn ReasoningBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    fn request(ctx: &RunContext, input: &PlanningInput<'_>) -> ReasoningRequest {
        ReasoningRequest {
            run_id: ctx.run_id.to_string(),
            correlation_id: ctx.correlation_id.to_string(),
            instructions: INSTRUCTIONS.to_string(),
            profile: input.profile.clone(),
            state: input.state.clone(),
            history: input.history.entries().to_vec(),
            catalog: input.catalog.clone(),
        }
    }
}

#[async_trait]
impl Planner for ReasoningPlanner {
    fn kind(&self) -> PlannerKind {
        PlannerKind::Reasoning
    }

    async fn propose(&self, ctx: &RunContext, input: PlanningInput<'_>) -> PlannerResult<Proposal> {
        let request = Self::request(ctx, &input);
        let reply = tokio::time::timeout(self.timeout, self.backend.complete(ctx, &request))
            .await
            .map_err(|_| PlannerError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| PlannerError::Unavailable(e.to_string()))?;

        let proposal = parse_proposal(&reply)?;
        if let ToolChoice::Tool(tool) = proposal.choice {
            if !input.catalog.contains(tool) {
                return Err(PlannerError::OutOfPolicy(format!("{tool} is not in the catalog")));
            }
        }
        check_proposable(input.state, input.profile, proposal.choice)?;
        Ok(proposal)
    }
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    tool: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    rationale: String,
    confidence: f64,
}

/// Parse a backend reply into a proposal.
pub fn parse_proposal(reply: &str) -> PlannerResult<Proposal> {
    let body = extract_json(reply);
    let raw: RawProposal =
        serde_json::from_str(body).map_err(|e| PlannerError::Unparsable(e.to_string()))?;

    let choice: ToolChoice = raw
        .tool
        .parse()
        .map_err(|_| PlannerError::Unparsable(format!("unknown tool `{}`", raw.tool)))?;
    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(PlannerError::Unparsable(format!(
            "confidence {} outside [0, 1]",
            raw.confidence
        )));
    }
    let action = match raw.action.as_deref().map(str::trim) {
        Some(a) if a.eq_ignore_ascii_case("skip") && !choice.is_complete() => Action::Skip,
        _ => Action::Run,
    };

    Ok(Proposal {
        choice,
        action,
        rationale: raw.rationale,
        confidence: raw.confidence,
    })
}

fn code_fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// The JSON body of a reply: a fenced block if present, else the span from
/// the first `{` to the last `}`.
fn extract_json(reply: &str) -> &str {
    if let Some(body) = code_fence()
        .and_then(|re| re.captures(reply))
        .and_then(|caps| caps.get(1))
    {
        return body.as_str().trim();
    }
    let trimmed = reply.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
