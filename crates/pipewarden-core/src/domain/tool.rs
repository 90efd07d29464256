//! Tool identifiers, the `complete` sentinel, and the tool catalog.

use serde::{Deserialize, Serialize};

use super::error::PipewardenError;

/// An analysis or transformation step the loop can invoke through an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    Ingest,
    Validate,
    /// Analysis phase: detect issues and prepare a candidate revision.
    Optimise,
    /// Apply phase: apply suggested fixes produced by the analysis.
    Fix,
    Critic,
    RiskAssess,
    SecurityScan,
    /// Open a pull request with the final artifacts.
    Resolve,
}

impl ToolId {
    pub const ALL: [ToolId; 8] = [
        ToolId::Ingest,
        ToolId::Validate,
        ToolId::Optimise,
        ToolId::Fix,
        ToolId::Critic,
        ToolId::RiskAssess,
        ToolId::SecurityScan,
        ToolId::Resolve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::Ingest => "ingest",
            ToolId::Validate => "validate",
            ToolId::Optimise => "optimise",
            ToolId::Fix => "fix",
            ToolId::Critic => "critic",
            ToolId::RiskAssess => "risk_assess",
            ToolId::SecurityScan => "security_scan",
            ToolId::Resolve => "resolve",
        }
    }

    /// Idempotent tools may be retried by the executor on transient failure.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            ToolId::Validate | ToolId::RiskAssess | ToolId::SecurityScan | ToolId::Critic
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolId::Ingest => "Fetch the pipeline definition and related build context",
            ToolId::Validate => "Check the current pipeline definition for syntax and schema errors",
            ToolId::Optimise => {
                "Analyse the pipeline for issues and prepare an optimised candidate revision"
            }
            ToolId::Fix => "Apply the suggested fixes produced by the analysis phase",
            ToolId::Critic => "Review the candidate change and score fix and merge confidence",
            ToolId::RiskAssess => "Score the operational risk of the candidate change",
            ToolId::SecurityScan => "Scan the candidate change for secret exposure and unsafe steps",
            ToolId::Resolve => "Open a pull request with the final artifacts",
        }
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolId {
    type Err = PipewardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| PipewardenError::UnknownTool(s.to_string()))
    }
}

/// What a proposal targets: a tool, or the `complete` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ToolChoice {
    Tool(ToolId),
    Complete,
}

impl ToolChoice {
    pub const COMPLETE: &'static str = "complete";

    pub fn tool(&self) -> Option<ToolId> {
        match self {
            ToolChoice::Tool(t) => Some(*t),
            ToolChoice::Complete => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ToolChoice::Complete)
    }

    pub fn is(&self, tool: ToolId) -> bool {
        self.tool() == Some(tool)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Tool(t) => t.as_str(),
            ToolChoice::Complete => Self::COMPLETE,
        }
    }
}

impl From<ToolId> for ToolChoice {
    fn from(tool: ToolId) -> Self {
        ToolChoice::Tool(tool)
    }
}

impl From<ToolChoice> for String {
    fn from(choice: ToolChoice) -> Self {
        choice.as_str().to_string()
    }
}

impl TryFrom<String> for ToolChoice {
    type Error = PipewardenError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::str::FromStr for ToolChoice {
    type Err = PipewardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(Self::COMPLETE) {
            return Ok(ToolChoice::Complete);
        }
        Ok(ToolChoice::Tool(s.to_ascii_lowercase().parse()?))
    }
}

impl std::fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Description of one tool as offered to a reasoning backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: ToolId,
    pub description: String,
    pub idempotent: bool,
}

/// The set of tools a planner may choose from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalog {
    pub tools: Vec<ToolSpec>,
}

impl ToolCatalog {
    /// Catalog describing every known tool.
    pub fn standard() -> Self {
        Self::of(ToolId::ALL)
    }

    pub fn of(tools: impl IntoIterator<Item = ToolId>) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|id| ToolSpec {
                    id,
                    description: id.description().to_string(),
                    idempotent: id.is_idempotent(),
                })
                .collect(),
        }
    }

    pub fn contains(&self, tool: ToolId) -> bool {
        self.tools.iter().any(|t| t.id == tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_parses_tools_and_sentinel() {
        assert_eq!("complete".parse::<ToolChoice>().unwrap(), ToolChoice::Complete);
        assert_eq!(
            " Security_Scan ".parse::<ToolChoice>().unwrap(),
            ToolChoice::Tool(ToolId::SecurityScan)
        );
        assert!("deploy".parse::<ToolChoice>().is_err());
    }

    #[test]
    fn test_choice_serializes_as_plain_string() {
        let json = serde_json::to_string(&ToolChoice::Tool(ToolId::RiskAssess)).unwrap();
        assert_eq!(json, "\"risk_assess\"");
        let back: ToolChoice = serde_json::from_str("\"complete\"").unwrap();
        assert!(back.is_complete());
    }

    #[test]
    fn test_only_read_only_tools_are_idempotent() {
        let idempotent: Vec<_> = ToolId::ALL.into_iter().filter(|t| t.is_idempotent()).collect();
        assert_eq!(
            idempotent,
            vec![
                ToolId::Validate,
                ToolId::Critic,
                ToolId::RiskAssess,
                ToolId::SecurityScan
            ]
        );
        assert!(!ToolId::Resolve.is_idempotent());
    }

    #[test]
    fn test_catalog_of_subset() {
        let catalog = ToolCatalog::of([ToolId::Ingest, ToolId::Validate]);
        assert!(catalog.contains(ToolId::Validate));
        assert!(!catalog.contains(ToolId::Resolve));
        assert_eq!(ToolCatalog::standard().tools.len(), 8);
    }
}
