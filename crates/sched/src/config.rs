use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sealer_core::config::env_parse;
use sealer_core::ProofType;

use crate::error::SchedError;

/// Scheduler configuration, typically parsed from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedConfig {
    /// Seal proof the resource table is looked up with.
    #[serde(default = "default_seal_proof")]
    pub seal_proof: ProofType,
    /// Window requests each worker keeps outstanding.
    #[serde(default = "default_sched_windows")]
    pub sched_windows: usize,
    /// Upper bound on a single selector preference comparison.
    #[serde(default = "default_selector_timeout_ms")]
    pub selector_timeout_ms: u64,
    /// Capacity of the scheduler's control channel.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_seal_proof() -> ProofType { ProofType::StackedDrg2KiB }
fn default_sched_windows() -> usize { 2 }
fn default_selector_timeout_ms() -> u64 { 5_000 }
fn default_queue_capacity() -> usize { 64 }

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            seal_proof: default_seal_proof(),
            sched_windows: default_sched_windows(),
            selector_timeout_ms: default_selector_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl SchedConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Override fields from `SEALER_SCHED_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(proof) = env_parse::<ProofType>("SEALER_SCHED_SEAL_PROOF") {
            self.seal_proof = proof;
        }
        if let Some(windows) = env_parse("SEALER_SCHED_WINDOWS") {
            self.sched_windows = windows;
        }
        if let Some(ms) = env_parse("SEALER_SCHED_SELECTOR_TIMEOUT_MS") {
            self.selector_timeout_ms = ms;
        }
        if let Some(cap) = env_parse("SEALER_SCHED_QUEUE_CAPACITY") {
            self.queue_capacity = cap;
        }
    }

    pub fn validate(&self) -> Result<(), SchedError> {
        if self.sched_windows == 0 {
            return Err(SchedError::Config(
                "sched_windows must be at least 1".into(),
            ));
        }
        if self.selector_timeout_ms == 0 {
            return Err(SchedError::Config(
                "selector_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SchedError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }
}
