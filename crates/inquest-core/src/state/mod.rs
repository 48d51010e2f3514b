//! Investigation data model.
//!
//! `InvestigationState` is owned exclusively by the engine. Domain agents and
//! tools only ever see read-only snapshots and hand back deltas; the engine's
//! serialized merge step is the single place shared state is mutated. Once the
//! phase is terminal the state is immutable.

mod findings;

pub use findings::{DomainDelta, DomainFindings, ToolExecutionRecord, ToolStatus};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Convenience alias for untyped field maps (raw agent output, tool params).
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// One independent analysis dimension (e.g. `network`, `device`, `location`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Domain {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Domain {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// The entity under investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type (e.g. `account`, `transaction`).
    pub kind: String,
    pub value: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Lifecycle phase of an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialization,
    FetchingData,
    DomainAnalysis,
    Orchestrating,
    SafetyValidation,
    Summary,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initialization => "initialization",
            Phase::FetchingData => "fetching_data",
            Phase::DomainAnalysis => "domain_analysis",
            Phase::Orchestrating => "orchestrating",
            Phase::SafetyValidation => "safety_validation",
            Phase::Summary => "summary",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why an investigation reached its terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The orchestrator loop bound fired. An explicit outcome, not an error.
    MaxLoopsReached,
    /// Every required domain produced findings.
    FullCoverage,
    /// Some domains produced findings, others failed or ran out of attempts.
    /// Clearly distinct from `failed` -- never conflated.
    PartialCoverage,
    /// Zero domains completed and no partial risk score could be computed.
    NoDomainsCompleted,
    Cancelled,
}

/// A structured, append-only journal entry. Values of blocked fields are
/// never stored here, only names and counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateError {
    /// Component that recorded the entry (e.g. `whitelist`, `domain:network`).
    pub source: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A safety constraint violation injected by the safety validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyOverride {
    pub rule: String,
    pub detail: String,
    pub at: DateTime<Utc>,
    /// Unresolved overrides keep the orchestrator routing through safety
    /// validation instead of finalizing.
    pub resolved: bool,
}

/// Shared state for a single investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationState {
    pub investigation_id: String,
    pub entity: EntityRef,
    pub current_phase: Phase,
    pub domain_findings: BTreeMap<Domain, DomainFindings>,
    /// Ordered set: insertion order preserved, no duplicates.
    pub domains_completed: Vec<Domain>,
    /// Dispatch attempts per domain, including failed ones.
    pub domain_attempts: BTreeMap<Domain, u32>,
    /// Ordered list of distinct tool names invoked.
    pub tools_used: Vec<String>,
    /// Every tool call ever made, keyed by execution id
    /// (`<tool>#<agent>#<attempt>`). Circuit-open short-circuits are recorded
    /// too; nothing is dropped.
    pub tool_results: BTreeMap<String, ToolExecutionRecord>,
    pub orchestrator_loops: u32,
    pub tool_execution_attempts: u32,
    pub safety_overrides: Vec<SafetyOverride>,
    pub safety_validated: bool,
    pub requires_manual_review: bool,
    pub errors: Vec<StateError>,
    pub risk_score: f64,
    pub completion_reason: Option<CompletionReason>,
    /// Combined efficiency score, filled in at finalization.
    pub efficiency_score: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl InvestigationState {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            investigation_id: uuid::Uuid::new_v4().to_string(),
            entity,
            current_phase: Phase::Initialization,
            domain_findings: BTreeMap::new(),
            domains_completed: Vec::new(),
            domain_attempts: BTreeMap::new(),
            tools_used: Vec::new(),
            tool_results: BTreeMap::new(),
            orchestrator_loops: 0,
            tool_execution_attempts: 0,
            safety_overrides: Vec::new(),
            safety_validated: false,
            requires_manual_review: false,
            errors: Vec::new(),
            risk_score: 0.0,
            completion_reason: None,
            efficiency_score: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    /// Append a structured warning to the error journal.
    pub fn record_error(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.errors.push(StateError {
            source: source.into(),
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn domain_completed(&self, domain: &Domain) -> bool {
        self.domains_completed.contains(domain)
    }

    pub fn attempts_for(&self, domain: &Domain) -> u32 {
        self.domain_attempts.get(domain).copied().unwrap_or(0)
    }

    /// True while any override still awaits resolution by the safety node.
    pub fn has_pending_overrides(&self) -> bool {
        self.safety_overrides.iter().any(|o| !o.resolved)
    }

    /// The engine's single merge step. Records from the delta are appended,
    /// findings installed, failures journaled. Never called concurrently:
    /// fan-out results are merged one at a time after the fan-in barrier.
    pub fn apply_delta(&mut self, delta: DomainDelta) {
        *self.domain_attempts.entry(delta.domain.clone()).or_insert(0) += 1;

        for record in delta.tool_records {
            self.tool_execution_attempts += 1;
            if !self.tools_used.contains(&record.tool_name) {
                self.tools_used.push(record.tool_name.clone());
            }
            let key = record.execution_key();
            self.tool_results.insert(key, record);
        }

        for warning in delta.warnings {
            self.record_error("whitelist", warning);
        }

        if delta.failed {
            let message = delta
                .error
                .unwrap_or_else(|| "domain analysis failed".to_string());
            self.record_error(format!("domain:{}", delta.domain), message);
            return;
        }

        if let Some(findings) = delta.findings {
            self.domain_findings.insert(delta.domain.clone(), findings);
            if !self.domains_completed.contains(&delta.domain) {
                self.domains_completed.push(delta.domain);
            }
            self.recompute_risk();
        }
    }

    /// Confidence-weighted mean of per-domain risk scores, clamped to [0, 1].
    pub fn recompute_risk(&mut self) {
        let mut weighted = 0.0;
        let mut weight = 0.0;
        for findings in self.domain_findings.values() {
            let confidence = findings.confidence.clamp(0.0, 1.0);
            weighted += findings.risk_score.clamp(0.0, 1.0) * confidence;
            weight += confidence;
        }
        self.risk_score = if weight > 0.0 {
            (weighted / weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}
