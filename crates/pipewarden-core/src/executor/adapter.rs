//! Tool adapter contract and registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Issue, Review, RunContext, RunState, ToolId, ToolOutput};

use super::ToolError;

/// The slice of run state handed to an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool: ToolId,
    /// Latest artifact of every tool that produced one.
    pub artifacts: BTreeMap<ToolId, serde_json::Value>,
    /// For `fix`: only issues still awaiting a fix. Otherwise all issues.
    pub issues: Vec<Issue>,
    pub reviews: Vec<Review>,
}

impl ToolInput {
    pub fn from_state(tool: ToolId, state: &RunState) -> Self {
        let issues = if tool == ToolId::Fix {
            state.issues_requiring_fix().cloned().collect()
        } else {
            state.issues.clone()
        };
        Self {
            tool,
            artifacts: state.artifacts.clone(),
            issues,
            reviews: state.reviews.clone(),
        }
    }
}

/// Invokes one external analysis/transform tool.
///
/// Implementations must finish or fail within the executor's deadline and
/// must be safe to call again when the tool is idempotent.
#[async_trait]
pub trait ToolAdapter: Send + Sync + 'static {
    async fn call(&self, ctx: &RunContext, input: &ToolInput) -> Result<ToolOutput, ToolError>;
}

/// Adapters keyed by tool id.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    adapters: HashMap<ToolId, Arc<dyn ToolAdapter>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` for `tool`, returning the adapter it replaced.
    pub fn register(
        &mut self,
        tool: ToolId,
        adapter: Arc<dyn ToolAdapter>,
    ) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.insert(tool, adapter)
    }

    pub fn with_adapter(mut self, tool: ToolId, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.register(tool, adapter);
        self
    }

    /// One adapter serving every known tool.
    pub fn uniform(adapter: Arc<dyn ToolAdapter>) -> Self {
        ToolId::ALL
            .into_iter()
            .fold(Self::new(), |reg, tool| reg.with_adapter(tool, adapter.clone()))
    }

    pub fn get(&self, tool: ToolId) -> Option<&Arc<dyn ToolAdapter>> {
        self.adapters.get(&tool)
    }

    pub fn contains(&self, tool: ToolId) -> bool {
        self.adapters.contains_key(&tool)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<_> = self.adapters.keys().collect();
        tools.sort();
        f.debug_struct("ToolRegistry").field("tools", &tools).finish()
    }
}
