//! Tool execution with timeout and retry controls.
//!
//! The [`Executor`] dispatches one tool to its registered adapter and
//! measures the call. Idempotent tools are retried on transient failure or
//! timeout with exponential backoff; everything else gets one attempt. The
//! executor never touches run state: it only returns an [`ActionResult`].

pub mod adapter;
pub mod error;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ActionResult, RunContext, RunState, ToolId, ToolOutput};
use crate::metrics::METRICS;

pub use adapter::{ToolAdapter, ToolInput, ToolRegistry};
pub use error::ToolError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Deadline for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Extra attempts for idempotent tools (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

impl ExecutorConfig {
    /// Delay before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Executor {
    registry: ToolRegistry,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(registry: ToolRegistry, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `tool` against the current state. Never fails: adapter errors
    /// and timeouts become an unsuccessful [`ActionResult`].
    pub async fn execute(&self, ctx: &RunContext, tool: ToolId, state: &RunState) -> ActionResult {
        let started = Instant::now();
        let finish = |attempts: u32, timed_out: bool, outcome: Result<ToolOutput, String>| {
            let (output, error) = match outcome {
                Ok(output) => (Some(output), None),
                Err(error) => (None, Some(error)),
            };
            ActionResult {
                tool,
                success: output.is_some(),
                duration_ms: started.elapsed().as_millis() as u64,
                attempts,
                timed_out,
                output,
                error,
            }
        };

        let Some(adapter) = self.registry.get(tool) else {
            return finish(0, false, Err(format!("no adapter registered for {tool}")));
        };

        let input = ToolInput::from_state(tool, state);
        let max_attempts = if tool.is_idempotent() {
            self.config.max_retries + 1
        } else {
            1
        };
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let mut attempt = 1;
        loop {
            let (error, timed_out) =
                match tokio::time::timeout(timeout, adapter.call(ctx, &input)).await {
                    Ok(Ok(output)) => return finish(attempt, false, Ok(output)),
                    Ok(Err(err)) if err.is_transient() => (err.to_string(), false),
                    Ok(Err(err)) => return finish(attempt, false, Err(err.to_string())),
                    Err(_elapsed) => (
                        format!("timed out after {}ms", self.config.timeout_ms),
                        true,
                    ),
                };

            if attempt >= max_attempts {
                return finish(attempt, timed_out, Err(error));
            }

            METRICS.inc_tool_retries();
            let delay = self.config.backoff(attempt);
            debug!(
                run_id = %ctx.run_id,
                tool = %tool,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying tool"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
