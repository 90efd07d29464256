//! Adapter failure taxonomy.

/// Error returned by a [`ToolAdapter`](super::ToolAdapter).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// Worth retrying (rate limit, flaky network).
    #[error("transient failure: {0}")]
    Transient(String),

    /// The tool ran and refused the input. Retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The tool cannot be reached or is not configured.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Transient(_))
    }
}
