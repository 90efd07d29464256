//! Orchestrator configuration.
//!
//! Loaded from environment variables ([`OrchestratorConfig::from_env`]) or a
//! TOML file ([`OrchestratorConfig::from_toml_str`]). Anything not set keeps
//! its default.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{PipewardenError, Result};
use crate::executor::ExecutorConfig;
use crate::scoring::ScoringConfig;

pub const ENV_TOOL_TIMEOUT_MS: &str = "PIPEWARDEN_TOOL_TIMEOUT_MS";
pub const ENV_TOOL_MAX_RETRIES: &str = "PIPEWARDEN_TOOL_MAX_RETRIES";
pub const ENV_TOOL_BACKOFF_MS: &str = "PIPEWARDEN_TOOL_BACKOFF_MS";
pub const ENV_PLANNER_TIMEOUT_MS: &str = "PIPEWARDEN_PLANNER_TIMEOUT_MS";
pub const ENV_STORE_TIMEOUT_MS: &str = "PIPEWARDEN_STORE_TIMEOUT_MS";
pub const ENV_PARALLEL_OPTIONAL: &str = "PIPEWARDEN_PARALLEL_OPTIONAL";
pub const ENV_ITERATION_MARGIN: &str = "PIPEWARDEN_ITERATION_MARGIN";
pub const ENV_DEFAULT_QUALITY: &str = "CRITIC_DEFAULT_QUALITY_SCORE";
pub const ENV_REGRESSION_PENALTY: &str = "CRITIC_REGRESSION_PENALTY";
pub const ENV_UNRESOLVED_PENALTY: &str = "CRITIC_UNRESOLVED_PENALTY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub executor: ExecutorConfig,
    pub planner_timeout_ms: u64,
    /// Deadline for every store write.
    pub store_timeout_ms: u64,
    /// Dispatch `risk_assess` and `security_scan` together when both are due.
    pub parallel_optional: bool,
    /// Added to the policy size to get the iteration cap.
    pub iteration_margin: u32,
    pub scoring: ScoringConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            planner_timeout_ms: 20_000,
            store_timeout_ms: 5_000,
            parallel_optional: false,
            iteration_margin: 4,
            scoring: ScoringConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        set(&mut cfg.executor.timeout_ms, ENV_TOOL_TIMEOUT_MS, read(ENV_TOOL_TIMEOUT_MS))?;
        set(&mut cfg.executor.max_retries, ENV_TOOL_MAX_RETRIES, read(ENV_TOOL_MAX_RETRIES))?;
        set(&mut cfg.executor.backoff_base_ms, ENV_TOOL_BACKOFF_MS, read(ENV_TOOL_BACKOFF_MS))?;
        set(&mut cfg.planner_timeout_ms, ENV_PLANNER_TIMEOUT_MS, read(ENV_PLANNER_TIMEOUT_MS))?;
        set(&mut cfg.store_timeout_ms, ENV_STORE_TIMEOUT_MS, read(ENV_STORE_TIMEOUT_MS))?;
        set(&mut cfg.iteration_margin, ENV_ITERATION_MARGIN, read(ENV_ITERATION_MARGIN))?;
        set(
            &mut cfg.scoring.default_quality_score,
            ENV_DEFAULT_QUALITY,
            read(ENV_DEFAULT_QUALITY),
        )?;
        set(
            &mut cfg.scoring.regression_penalty,
            ENV_REGRESSION_PENALTY,
            read(ENV_REGRESSION_PENALTY),
        )?;
        set(
            &mut cfg.scoring.unresolved_penalty,
            ENV_UNRESOLVED_PENALTY,
            read(ENV_UNRESOLVED_PENALTY),
        )?;

        if let Some(raw) = read(ENV_PARALLEL_OPTIONAL) {
            cfg.parallel_optional = parse_flag(&raw).ok_or_else(|| {
                PipewardenError::Config(format!("{ENV_PARALLEL_OPTIONAL}: expected a boolean, got `{raw}`"))
            })?;
        }
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipewardenError::Config(e.to_string()))
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_millis(self.planner_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn set<T: FromStr>(slot: &mut T, key: &str, raw: Option<String>) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = raw {
        *slot = raw
            .parse()
            .map_err(|e| PipewardenError::Config(format!("{key}: {e} (got `{raw}`)")))?;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let cfg = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, OrchestratorConfig::default());
        assert_eq!(cfg.store_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.scoring.default_quality_score, 7.0);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = OrchestratorConfig::from_lookup(lookup(&[
            (ENV_TOOL_TIMEOUT_MS, "1500"),
            (ENV_TOOL_MAX_RETRIES, "0"),
            (ENV_PARALLEL_OPTIONAL, "yes"),
            (ENV_REGRESSION_PENALTY, "0.1"),
            (ENV_ITERATION_MARGIN, " 2 "),
        ]))
        .unwrap();
        assert_eq!(cfg.executor.timeout_ms, 1500);
        assert_eq!(cfg.executor.max_retries, 0);
        assert!(cfg.parallel_optional);
        assert_eq!(cfg.scoring.regression_penalty, 0.1);
        assert_eq!(cfg.iteration_margin, 2);
    }

    #[test]
    fn test_unparsable_value_is_config_error() {
        let err = OrchestratorConfig::from_lookup(lookup(&[(ENV_STORE_TIMEOUT_MS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, PipewardenError::Config(msg) if msg.contains(ENV_STORE_TIMEOUT_MS)));
    }

    #[test]
    fn test_from_toml() {
        let cfg = OrchestratorConfig::from_toml_str(
            "parallel_optional = true\n\n[executor]\ntimeout_ms = 250\n\n[scoring]\nunresolved_penalty = 0.04\n",
        )
        .unwrap();
        assert!(cfg.parallel_optional);
        assert_eq!(cfg.executor.timeout_ms, 250);
        assert_eq!(cfg.executor.max_retries, 2);
        assert_eq!(cfg.scoring.unresolved_penalty, 0.04);
        assert!(OrchestratorConfig::from_toml_str("executor = 3").is_err());
    }
}
