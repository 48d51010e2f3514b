//! Engine configuration.
//!
//! Every tunable has a sensible default; a config file only needs to name
//! what it changes. Loaded from TOML, same keys as the struct fields.

use std::path::Path;

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::performance::PerformanceConfig;
use crate::safety::SafetyConfig;
use crate::tools::ToolConfig;
use crate::whitelist::EnforcementMode;

/// Top-level engine tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard bound on orchestrator iterations (`N`). The loop counter never
    /// exceeds this value.
    pub max_loops: u32,
    /// Dispatch attempts per domain before it is abandoned.
    pub max_domain_attempts: u32,
    /// Concurrent domain analyses per fan-out.
    pub fan_out_width: usize,
    /// Overall wall-clock budget for one investigation.
    pub investigation_timeout_ms: u64,
    pub enforcement: EnforcementMode,
    /// Tools run once up front during the fetch phase, before any domain
    /// analysis.
    pub prefetch_tools: Vec<String>,
    pub tools: ToolConfig,
    pub safety: SafetyConfig,
    pub performance: PerformanceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loops: 8,
            max_domain_attempts: 2,
            fan_out_width: 2,
            investigation_timeout_ms: 120_000,
            enforcement: EnforcementMode::default(),
            prefetch_tools: Vec::new(),
            tools: ToolConfig::default(),
            safety: SafetyConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| EngineError::Config(err.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            EngineError::Config(format!("{}: {err}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&raw)
    }
}
