//! Domain agent execution.
//!
//! A domain analyzer is an opaque callable: unstructured input in, raw
//! findings out. The runner executes it against a read-only snapshot of
//! shared state (never the live object), pipes its output through the
//! whitelist enforcer, and hands back a delta. A callable that errors,
//! panics, or times out yields an empty-but-marked-failed delta; domain
//! failures never abort the investigation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;
use crate::state::{
    Domain, DomainDelta, DomainFindings, InvestigationState, JsonMap, ToolExecutionRecord,
    ToolStatus,
};
use crate::tools::{ToolCallContext, ToolCoordinator, ToolOutcome};
use crate::whitelist::{EnforcementMode, WhitelistPolicy};

/// Raw, unfiltered output of a domain's analysis callable. Nothing in here
/// is trusted until the whitelist enforcer has seen it.
#[derive(Debug, Clone, Default)]
pub struct RawFindings {
    pub risk_score: f64,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub metrics: JsonMap,
}

/// The opaque analysis callable for one domain.
#[async_trait]
pub trait DomainAnalyzer: Send + Sync {
    fn domain(&self) -> Domain;

    /// Analyze the entity using the read-only snapshot and whatever tools
    /// the toolbox exposes. The orchestration layer never depends on how
    /// the result was produced.
    async fn analyze(
        &self,
        snapshot: &InvestigationState,
        tools: &AgentToolbox,
    ) -> anyhow::Result<RawFindings>;
}

/// Per-run tool access handed to an analyzer. Collects audit records so the
/// agent never writes to shared state; the engine merges them later.
pub struct AgentToolbox {
    coordinator: Arc<ToolCoordinator>,
    agent: Domain,
    deadline: Option<Instant>,
    attempts: Mutex<HashMap<String, u32>>,
    records: Mutex<Vec<ToolExecutionRecord>>,
}

impl AgentToolbox {
    pub(crate) fn new(
        coordinator: Arc<ToolCoordinator>,
        agent: Domain,
        deadline: Option<Instant>,
        snapshot: &InvestigationState,
    ) -> Self {
        // Seed attempt counters from the snapshot so re-dispatched domains
        // keep counting where their previous run left off.
        let mut attempts: HashMap<String, u32> = HashMap::new();
        for record in snapshot.tool_results.values() {
            if record.agent.as_deref() == Some(agent.as_str()) {
                let entry = attempts.entry(record.tool_name.clone()).or_insert(0);
                *entry = (*entry).max(record.attempt_count);
            }
        }

        Self {
            coordinator,
            agent,
            deadline,
            attempts: Mutex::new(attempts),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Call a tool through the coordinator. The outcome is typed; the audit
    /// record is retained for the delta regardless of outcome. A pending
    /// placeholder is written before dispatch so that an analysis cut short
    /// mid-call (timeout, cancellation) still leaves an audit trail.
    pub async fn call(&self, tool_name: &str, params: Value) -> ToolOutcome {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(tool_name.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let slot = {
            let mut records = self.records.lock();
            records.push(ToolExecutionRecord {
                tool_name: tool_name.to_string(),
                agent: Some(self.agent.to_string()),
                status: ToolStatus::Pending,
                attempt_count: attempt,
                latency_ms: 0,
                error: None,
            });
            records.len() - 1
        };

        let ctx = ToolCallContext {
            agent: Some(self.agent.to_string()),
            attempt,
            deadline: self.deadline,
        };
        let (outcome, record) = self.coordinator.execute(tool_name, params, &ctx).await;

        // Internal coordinator retries may have advanced the counter.
        self.attempts
            .lock()
            .insert(tool_name.to_string(), record.attempt_count);
        self.records.lock()[slot] = record;

        outcome
    }

    fn into_records(self) -> Vec<ToolExecutionRecord> {
        self.records.into_inner()
    }
}

/// Executes one domain's analyzer and enforces isolation on its output.
pub struct AgentRunner {
    whitelist: Arc<WhitelistPolicy>,
    mode: EnforcementMode,
}

impl AgentRunner {
    pub fn new(whitelist: Arc<WhitelistPolicy>, mode: EnforcementMode) -> Self {
        Self { whitelist, mode }
    }

    /// Run one analyzer against a snapshot. Returns `Err` only for a strict-
    /// mode whitelist violation; every other failure is folded into the
    /// delta.
    pub async fn run(
        &self,
        analyzer: &dyn DomainAnalyzer,
        snapshot: &InvestigationState,
        toolbox: AgentToolbox,
    ) -> Result<DomainDelta> {
        let domain = analyzer.domain();
        let started = Instant::now();

        let analysis = AssertUnwindSafe(self.bounded_analyze(analyzer, snapshot, &toolbox))
            .catch_unwind()
            .await;

        let raw = match analysis {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                tracing::warn!(domain = %domain, error = %err, "domain analysis failed");
                let mut delta = DomainDelta::failed(domain, err.to_string());
                delta.tool_records = toolbox.into_records();
                return Ok(delta);
            }
            Err(_) => {
                tracing::error!(domain = %domain, "domain analysis panicked");
                let mut delta = DomainDelta::failed(domain, "analysis callable panicked");
                delta.tool_records = toolbox.into_records();
                return Ok(delta);
            }
        };

        let (metrics, blocked) = self.whitelist.filter_fields(&domain, &raw.metrics);
        let mut findings = DomainFindings {
            domain: domain.clone(),
            risk_score: raw.risk_score.clamp(0.0, 1.0),
            confidence: raw.confidence.clamp(0.0, 1.0),
            evidence: raw.evidence,
            metrics,
        };

        // Defense-in-depth: re-check the already-filtered map before merge.
        let mut warnings = self
            .whitelist
            .assert_isolation(&domain, &mut findings, self.mode)?;
        for field in &blocked {
            warnings.push(format!("field '{field}' blocked for domain '{domain}'"));
        }

        tracing::debug!(
            domain = %domain,
            elapsed_ms = started.elapsed().as_millis() as u64,
            blocked = blocked.len(),
            "domain analysis completed"
        );

        Ok(DomainDelta {
            domain,
            findings: Some(findings),
            failed: false,
            error: None,
            blocked_fields: blocked,
            warnings,
            tool_records: toolbox.into_records(),
        })
    }

    async fn bounded_analyze(
        &self,
        analyzer: &dyn DomainAnalyzer,
        snapshot: &InvestigationState,
        toolbox: &AgentToolbox,
    ) -> anyhow::Result<RawFindings> {
        match toolbox.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    anyhow::bail!("investigation deadline exceeded before analysis");
                }
                match tokio::time::timeout(remaining, analyzer.analyze(snapshot, toolbox)).await {
                    Ok(result) => result,
                    Err(_) => anyhow::bail!(
                        "analysis timed out after {}ms",
                        remaining.as_millis()
                    ),
                }
            }
            None => analyzer.analyze(snapshot, toolbox).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EntityRef;
    use crate::tools::{ToolConfig, ToolHealthRegistry};
    use serde_json::json;
    use std::time::Duration;

    struct StaticAnalyzer {
        domain: Domain,
        metrics: JsonMap,
    }

    #[async_trait]
    impl DomainAnalyzer for StaticAnalyzer {
        fn domain(&self) -> Domain {
            self.domain.clone()
        }

        async fn analyze(
            &self,
            _snapshot: &InvestigationState,
            _tools: &AgentToolbox,
        ) -> anyhow::Result<RawFindings> {
            Ok(RawFindings {
                risk_score: 0.4,
                confidence: 0.8,
                evidence: vec!["seen before".to_string()],
                metrics: self.metrics.clone(),
            })
        }
    }

    struct FailingAnalyzer;

    #[async_trait]
    impl DomainAnalyzer for FailingAnalyzer {
        fn domain(&self) -> Domain {
            Domain::from("device")
        }

        async fn analyze(
            &self,
            _snapshot: &InvestigationState,
            _tools: &AgentToolbox,
        ) -> anyhow::Result<RawFindings> {
            anyhow::bail!("upstream unavailable")
        }
    }

    struct PanickingAnalyzer;

    #[async_trait]
    impl DomainAnalyzer for PanickingAnalyzer {
        fn domain(&self) -> Domain {
            Domain::from("device")
        }

        async fn analyze(
            &self,
            _snapshot: &InvestigationState,
            _tools: &AgentToolbox,
        ) -> anyhow::Result<RawFindings> {
            panic!("bug in analysis callable");
        }
    }

    fn toolbox(snapshot: &InvestigationState, agent: &str) -> AgentToolbox {
        let health = Arc::new(ToolHealthRegistry::new(3, Duration::from_secs(30)));
        let coordinator = Arc::new(ToolCoordinator::new(ToolConfig::default(), health));
        AgentToolbox::new(coordinator, Domain::from(agent), None, snapshot)
    }

    fn runner(mode: EnforcementMode) -> AgentRunner {
        let whitelist = Arc::new(
            WhitelistPolicy::builder()
                .domain("network", ["a"])
                .forbid(["b"])
                .build(),
        );
        AgentRunner::new(whitelist, mode)
    }

    fn metrics(pairs: &[(&str, serde_json::Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // Scenario: network returns {a: 1, b: 2} where b is globally forbidden.
    // Merged findings are {a: 1}, blocked list is ["b"], and a warning is
    // journaled when the delta is applied.
    #[tokio::test]
    async fn forbidden_field_is_blocked_and_warned() {
        let state = InvestigationState::new(EntityRef::new("account", "acct_1"));
        let analyzer = StaticAnalyzer {
            domain: Domain::from("network"),
            metrics: metrics(&[("a", json!(1)), ("b", json!(2))]),
        };
        let runner = runner(EnforcementMode::Production);

        let delta = runner
            .run(&analyzer, &state, toolbox(&state, "network"))
            .await
            .unwrap();

        let findings = delta.findings.as_ref().unwrap();
        assert_eq!(findings.metrics.len(), 1);
        assert_eq!(findings.metrics["a"], json!(1));
        assert_eq!(delta.blocked_fields, vec!["b".to_string()]);

        let mut state = state;
        state.apply_delta(delta);
        assert!(state
            .errors
            .iter()
            .any(|e| e.source == "whitelist" && e.message.contains('b')));
        assert_eq!(state.domain_findings[&Domain::from("network")].metrics["a"], json!(1));
    }

    #[tokio::test]
    async fn analyzer_error_becomes_failed_delta() {
        let state = InvestigationState::new(EntityRef::new("account", "acct_1"));
        let runner = runner(EnforcementMode::Production);

        let delta = runner
            .run(&FailingAnalyzer, &state, toolbox(&state, "device"))
            .await
            .unwrap();

        assert!(delta.failed);
        assert!(delta.findings.is_none());
        assert!(delta.error.as_deref().unwrap_or("").contains("unavailable"));
    }

    #[tokio::test]
    async fn analyzer_panic_is_contained() {
        let state = InvestigationState::new(EntityRef::new("account", "acct_1"));
        let runner = runner(EnforcementMode::Production);

        let delta = runner
            .run(&PanickingAnalyzer, &state, toolbox(&state, "device"))
            .await
            .unwrap();

        assert!(delta.failed);
        assert!(delta.error.as_deref().unwrap_or("").contains("panicked"));
    }

    // Scenario: an analysis is cut short while a tool call is in flight.
    // The placeholder written before dispatch survives as a pending record,
    // so the audit trail still shows the call was started.
    #[tokio::test]
    async fn abandoned_call_leaves_a_pending_record() {
        struct Slow;

        #[async_trait]
        impl crate::tools::Tool for Slow {
            fn name(&self) -> &str {
                "slow"
            }

            async fn execute(&self, _params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!({}))
            }
        }

        let state = InvestigationState::new(EntityRef::new("account", "acct_1"));
        let health = Arc::new(ToolHealthRegistry::new(3, Duration::from_secs(30)));
        let mut coordinator = ToolCoordinator::new(ToolConfig::default(), health);
        coordinator.register(Arc::new(Slow));
        let toolbox =
            AgentToolbox::new(Arc::new(coordinator), Domain::from("network"), None, &state);

        {
            let call = toolbox.call("slow", json!({}));
            futures::pin_mut!(call);
            assert!(futures::poll!(call.as_mut()).is_pending());
            // Dropped here, mid-flight.
        }

        let records = toolbox.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ToolStatus::Pending);
        assert_eq!(records[0].tool_name, "slow");
        assert_eq!(records[0].attempt_count, 1);
        assert_eq!(records[0].agent.as_deref(), Some("network"));
        assert!(records[0].error.is_none());
    }

    #[tokio::test]
    async fn toolbox_records_every_call_even_for_unknown_tools() {
        let state = InvestigationState::new(EntityRef::new("account", "acct_1"));
        let toolbox = toolbox(&state, "network");

        let outcome = toolbox.call("geocode", json!({"q": "somewhere"})).await;
        assert!(matches!(outcome, ToolOutcome::SoftFailure(_)));

        let records = toolbox.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tool_name, "geocode");
        assert_eq!(records[0].attempt_count, 1);
        assert_eq!(records[0].agent.as_deref(), Some("network"));
    }
}
