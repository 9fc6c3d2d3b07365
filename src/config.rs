//! Orchestrator configuration loaded from `provflow.toml`.
//!
//! [`OrchestratorConfig`] holds every tunable parameter. Values missing
//! from the file use sensible defaults, and `PROVFLOW_WORKERS` takes
//! precedence over the file for the worker pool size.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

use crate::routing::RoutingThresholds;

/// Top-level configuration loaded from `provflow.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub routing: RoutingThresholds,

    #[serde(default)]
    pub pool: PoolSection,
}

/// Retry behavior for failed stage attempts.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// Maximum attempts per stage (the first try counts as attempt 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    /// Concurrent stage invocations across a job. The default trades
    /// throughput against external-API rate limits.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    8
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from `provflow.toml` in the current directory,
    /// falling back to defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("provflow.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<OrchestratorConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment takes precedence over the file for the pool size.
        if let Ok(workers) = std::env::var("PROVFLOW_WORKERS")
            && let Ok(n) = workers.parse::<usize>()
            && n > 0
        {
            config.pool.workers = n;
        }

        Ok(config)
    }
}
