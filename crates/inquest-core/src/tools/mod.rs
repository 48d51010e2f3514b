//! Resilient external tool execution.
//!
//! - `Tool` - the single contract every backend satisfies, regardless of what
//!   it calls externally
//! - `ToolHealthRegistry` - per-tool circuit breaking, shared across
//!   investigations, one lock per tool
//! - `ToolCoordinator` - dispatch with per-category semaphores, deadlines,
//!   and optional backoff retries; every outcome is recorded for audit

mod backoff;
mod coordinator;
mod health;

pub use backoff::{backoff_delay, RetryConfig};
pub use coordinator::{ToolCallContext, ToolConfig, ToolCoordinator, ToolOutcome};
pub use health::{CircuitState, ToolHealth, ToolHealthRegistry, ToolHealthSnapshot};

use async_trait::async_trait;
use serde_json::Value;

/// Category used for per-category concurrency limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCategory {
    /// Cheap reads against reference data.
    Lookup,
    /// Calls that enrich the entity via third-party services.
    Enrichment,
    /// Scoring or verification backends, usually the slowest.
    Verification,
}

/// One external tool backend. The coordinator never depends on a tool's
/// internals, only on this contract.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> ToolCategory {
        ToolCategory::Enrichment
    }

    /// Execute the tool. Errors are soft failures from the engine's point of
    /// view; the coordinator decides about retries and circuit state.
    async fn execute(&self, params: Value) -> anyhow::Result<Value>;
}
