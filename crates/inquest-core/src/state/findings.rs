//! Findings, deltas, and tool execution records.

use serde::{Deserialize, Serialize};

use super::{Domain, JsonMap};

/// Structured output of one domain's analysis after whitelist enforcement.
///
/// Invariant: every key in `metrics` is in the domain's whitelist and absent
/// from the global forbidden set. Enforced at write time and re-checked
/// defensively before merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainFindings {
    pub domain: Domain,
    pub risk_score: f64,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub metrics: JsonMap,
}

/// What a single domain-agent run hands back to the engine for merging.
/// Agents never touch shared state directly.
#[derive(Debug, Clone)]
pub struct DomainDelta {
    pub domain: Domain,
    /// Present on success, `None` when the analysis callable failed.
    pub findings: Option<DomainFindings>,
    pub failed: bool,
    pub error: Option<String>,
    /// Field names stripped by the whitelist enforcer (names only).
    pub blocked_fields: Vec<String>,
    /// Structured warnings destined for the state's error journal.
    pub warnings: Vec<String>,
    /// Audit trail of every tool call the agent made, including circuit-open
    /// short-circuits.
    pub tool_records: Vec<ToolExecutionRecord>,
}

impl DomainDelta {
    /// An empty-but-marked-failed delta. Domain failures are isolated and
    /// recorded; they never abort the investigation.
    pub fn failed(domain: Domain, error: impl Into<String>) -> Self {
        Self {
            domain,
            findings: None,
            failed: true,
            error: Some(error.into()),
            blocked_fields: Vec::new(),
            warnings: Vec::new(),
            tool_records: Vec::new(),
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// The call was started but cut short before an outcome was recorded
    /// (analysis timed out or was cancelled mid-call).
    Pending,
    Completed,
    Failed,
}

/// Audit record for a single tool call. Every outcome is recorded verbatim,
/// including calls the circuit breaker refused to dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub tool_name: String,
    /// Domain agent on whose behalf the call ran, if any.
    pub agent: Option<String>,
    pub status: ToolStatus,
    /// Cumulative attempt number for this tool within one investigation.
    pub attempt_count: u32,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ToolExecutionRecord {
    /// Key under which this record lands in `tool_results`. Attempt numbers
    /// are cumulative per tool and caller, and the agent is part of the key,
    /// so records from a concurrent fan-out never collide.
    pub fn execution_key(&self) -> String {
        match &self.agent {
            Some(agent) => format!("{}#{}#{}", self.tool_name, agent, self.attempt_count),
            None => format!("{}#{}", self.tool_name, self.attempt_count),
        }
    }
}
