//! Engine composition root.
//!
//! Wires the task graph, orchestrator, agent runner, tool coordinator,
//! safety validator, store, and event feed into a runnable investigation.
//! The engine owns the state exclusively: agents see snapshots, deltas are
//! merged one at a time after each fan-out, and every snapshot is persisted
//! with the version it was read at.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentRunner, AgentToolbox, DomainAnalyzer};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventFeed, EventKind};
use crate::graph::{GraphSpec, LoopLimits, NodeKind};
use crate::orchestrator::{Decision, Orchestrator};
use crate::performance;
use crate::safety::SafetyValidator;
use crate::state::{
    CompletionReason, Domain, DomainDelta, EntityRef, InvestigationState, Phase,
};
use crate::storage::{InvestigationStore, MemoryInvestigationStore};
use crate::tools::{Tool, ToolCallContext, ToolCoordinator, ToolHealthRegistry};
use crate::whitelist::WhitelistPolicy;

/// Builder for [`InvestigationEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    whitelist: Arc<WhitelistPolicy>,
    analyzers: Vec<Arc<dyn DomainAnalyzer>>,
    tools: Vec<Arc<dyn Tool>>,
    coordinator: Option<Arc<ToolCoordinator>>,
    store: Option<Arc<dyn InvestigationStore>>,
    events: Option<Arc<EventFeed>>,
    cancel: CancellationToken,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            whitelist: Arc::new(WhitelistPolicy::default()),
            analyzers: Vec::new(),
            tools: Vec::new(),
            coordinator: None,
            store: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_whitelist(mut self, whitelist: Arc<WhitelistPolicy>) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn DomainAnalyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    /// Register a tool with the coordinator built by `build`. Ignored when an
    /// external coordinator is supplied.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Share a coordinator (and thus its health registry) across engines.
    pub fn with_coordinator(mut self, coordinator: Arc<ToolCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn InvestigationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: Arc<EventFeed>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Result<InvestigationEngine> {
        if self.analyzers.is_empty() {
            return Err(EngineError::InvalidInput(
                "at least one domain analyzer is required".to_string(),
            ));
        }

        let mut analyzers: HashMap<Domain, Arc<dyn DomainAnalyzer>> = HashMap::new();
        for analyzer in self.analyzers {
            let domain = analyzer.domain();
            if analyzers.insert(domain.clone(), analyzer).is_some() {
                return Err(EngineError::InvalidInput(format!(
                    "duplicate analyzer for domain '{domain}'"
                )));
            }
        }

        let mut domains: Vec<Domain> = analyzers.keys().cloned().collect();
        domains.sort();
        let graph = Arc::new(GraphSpec::standard(&domains)?);
        let limits = LoopLimits {
            max_loops: self.config.max_loops,
            max_domain_attempts: self.config.max_domain_attempts,
        };

        let coordinator = match self.coordinator {
            Some(coordinator) => coordinator,
            None => {
                let health = Arc::new(ToolHealthRegistry::new(
                    self.config.tools.failure_threshold,
                    Duration::from_millis(self.config.tools.cooldown_ms),
                ));
                let mut coordinator = ToolCoordinator::new(self.config.tools, health);
                for tool in self.tools {
                    coordinator.register(tool);
                }
                Arc::new(coordinator)
            }
        };

        Ok(InvestigationEngine {
            orchestrator: Orchestrator::new(Arc::clone(&graph), limits),
            graph,
            runner: AgentRunner::new(Arc::clone(&self.whitelist), self.config.enforcement),
            validator: SafetyValidator::new(self.config.safety),
            analyzers,
            coordinator,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryInvestigationStore::new())),
            events: self.events,
            cancel: self.cancel,
            config: self.config,
        })
    }
}

/// Runs investigations end to end.
pub struct InvestigationEngine {
    graph: Arc<GraphSpec>,
    orchestrator: Orchestrator,
    runner: AgentRunner,
    validator: SafetyValidator,
    analyzers: HashMap<Domain, Arc<dyn DomainAnalyzer>>,
    coordinator: Arc<ToolCoordinator>,
    store: Arc<dyn InvestigationStore>,
    events: Option<Arc<EventFeed>>,
    cancel: CancellationToken,
    config: EngineConfig,
}

impl InvestigationEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn store(&self) -> &Arc<dyn InvestigationStore> {
        &self.store
    }

    /// Run one investigation to a terminal phase. Domain failures and tool
    /// failures are absorbed into the state; only infrastructure faults and
    /// strict-mode isolation violations surface as `Err`.
    pub async fn run(&self, entity: EntityRef) -> Result<InvestigationState> {
        if entity.kind.trim().is_empty() || entity.value.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "entity kind and value must be non-empty".to_string(),
            ));
        }

        let mut state = InvestigationState::new(entity);
        let mut version = self.store.create(&state)?;
        let deadline = Instant::now() + Duration::from_millis(self.config.investigation_timeout_ms);

        tracing::info!(
            investigation_id = %state.investigation_id,
            entity_kind = %state.entity.kind,
            "investigation started"
        );
        self.publish(
            &state,
            EventKind::InvestigationStarted,
            json!({ "entity": state.entity }),
        );

        self.prefetch(&mut state, deadline).await;
        self.persist(&mut state, &mut version)?;

        loop {
            if self.cancel.is_cancelled() {
                state.completion_reason = Some(CompletionReason::Cancelled);
                state.record_error("engine", "investigation cancelled");
                break;
            }
            if Instant::now() >= deadline {
                state.record_error(
                    "engine",
                    format!(
                        "investigation exceeded its {}ms budget",
                        self.config.investigation_timeout_ms
                    ),
                );
                break;
            }

            match self.orchestrator.next(&mut state) {
                Decision::ForceSummary(_) => break,
                Decision::Summarize => break,
                Decision::RunDomains(domains) => {
                    self.run_domains(&mut state, domains, deadline).await?;
                    self.persist(&mut state, &mut version)?;
                }
                Decision::ValidateSafety => {
                    self.validate_safety(&mut state);
                    self.persist(&mut state, &mut version)?;
                }
            }
        }

        self.finalize(&mut state);
        self.persist(&mut state, &mut version)?;
        self.publish(
            &state,
            EventKind::InvestigationFinished,
            json!({
                "phase": state.current_phase.to_string(),
                "completion_reason": state.completion_reason,
                "risk_score": state.risk_score,
            }),
        );

        tracing::info!(
            investigation_id = %state.investigation_id,
            phase = %state.current_phase,
            loops = state.orchestrator_loops,
            risk_score = state.risk_score,
            "investigation finished"
        );
        Ok(state)
    }

    /// Run configured prefetch tools once, before any domain analysis. Their
    /// records are merged engine-side; failures are journaled and ignored.
    async fn prefetch(&self, state: &mut InvestigationState, deadline: Instant) {
        self.set_phase(state, Phase::FetchingData);
        let mut attempts: HashMap<&str, u32> = HashMap::new();
        for tool_name in &self.config.prefetch_tools {
            let attempt = attempts.entry(tool_name.as_str()).or_insert(0);
            *attempt += 1;
            let ctx = ToolCallContext {
                agent: None,
                attempt: *attempt,
                deadline: Some(deadline),
            };
            let params = json!({ "entity": state.entity });
            let (outcome, record) = self.coordinator.execute(tool_name, params, &ctx).await;
            attempts.insert(tool_name.as_str(), record.attempt_count);

            if !outcome.is_ok() {
                state.record_error(
                    "prefetch",
                    format!(
                        "tool '{tool_name}' failed: {}",
                        record.error.as_deref().unwrap_or("unknown")
                    ),
                );
            }
            state.tool_execution_attempts += 1;
            if !state.tools_used.contains(&record.tool_name) {
                state.tools_used.push(record.tool_name.clone());
            }
            state.tool_results.insert(record.execution_key(), record);
        }
        self.set_phase(state, Phase::Orchestrating);
    }

    /// Fan out over pending domains with bounded parallelism, then merge the
    /// deltas serially in domain order so the outcome is deterministic.
    async fn run_domains(
        &self,
        state: &mut InvestigationState,
        domains: Vec<Domain>,
        deadline: Instant,
    ) -> Result<()> {
        self.set_phase(state, Phase::DomainAnalysis);
        let snapshot = Arc::new(state.clone());

        let tasks = domains.into_iter().filter_map(|domain| {
            self.analyzers
                .get(&domain)
                .cloned()
                .map(|analyzer| (domain, analyzer))
        });

        let results: Vec<Result<DomainDelta>> = stream::iter(tasks)
            .map(|(domain, analyzer)| {
                let snapshot = Arc::clone(&snapshot);
                let coordinator = Arc::clone(&self.coordinator);
                let runner = &self.runner;
                async move {
                    let toolbox =
                        AgentToolbox::new(coordinator, domain, Some(deadline), &snapshot);
                    runner.run(analyzer.as_ref(), &snapshot, toolbox).await
                }
            })
            .buffer_unordered(self.config.fan_out_width.max(1))
            .collect()
            .await;

        let mut deltas = results.into_iter().collect::<Result<Vec<_>>>()?;
        deltas.sort_by(|a, b| a.domain.cmp(&b.domain));

        for delta in deltas {
            let kind = if delta.failed {
                EventKind::DomainFailed
            } else {
                EventKind::DomainCompleted
            };
            let payload = json!({ "domain": delta.domain, "failed": delta.failed });
            state.apply_delta(delta);
            self.publish(state, kind, payload);
        }

        self.set_phase(state, Phase::Orchestrating);
        Ok(())
    }

    /// Apply the safety validator's report. Overrides are recorded already
    /// resolved; their lasting effect is the manual-review flag.
    fn validate_safety(&self, state: &mut InvestigationState) {
        self.set_phase(state, Phase::SafetyValidation);
        let report = self.validator.validate(state);

        if !report.is_clean() {
            self.publish(
                state,
                EventKind::SafetyFlagged,
                json!({ "violations": report.overrides.len() }),
            );
        }
        for mut item in report.overrides {
            item.resolved = true;
            state.safety_overrides.push(item);
        }
        state.requires_manual_review |= report.requires_manual_review;
        state.safety_validated = true;
        self.set_phase(state, Phase::Orchestrating);
    }

    /// Summary step: settle the completion reason, score efficiency, and
    /// route to the terminal phase via the graph's summary edges.
    fn finalize(&self, state: &mut InvestigationState) {
        self.set_phase(state, Phase::Summary);

        if state.completion_reason.is_none() {
            let completed = state.domains_completed.len();
            let required = self.graph.required_domains().len();
            state.completion_reason = Some(if completed == 0 {
                CompletionReason::NoDomainsCompleted
            } else if completed >= required {
                CompletionReason::FullCoverage
            } else {
                CompletionReason::PartialCoverage
            });
        }

        state.finished_at = Some(chrono::Utc::now());
        let breakdown = performance::score(state, &self.config.performance);
        state.efficiency_score = Some(breakdown.efficiency);

        let terminal = self
            .graph
            .edges_from("summary")
            .find(|edge| {
                edge.predicate
                    .eval(state, &self.graph, self.orchestrator.limits())
            })
            .and_then(|edge| self.graph.node(&edge.to))
            .and_then(|node| match node.kind {
                NodeKind::Terminal(phase) => Some(phase),
                _ => None,
            })
            .unwrap_or(Phase::Failed);
        self.set_phase(state, terminal);
    }

    fn set_phase(&self, state: &mut InvestigationState, phase: Phase) {
        if state.current_phase == phase {
            return;
        }
        state.current_phase = phase;
        self.publish(
            state,
            EventKind::PhaseChanged,
            json!({ "phase": phase.to_string() }),
        );
    }

    /// Persist with optimistic concurrency. A conflict means another writer
    /// touched the row; re-read the version and retry once.
    fn persist(&self, state: &InvestigationState, version: &mut u64) -> Result<()> {
        match self.store.update(&state.investigation_id, state, *version) {
            Ok(next) => {
                *version = next;
                Ok(())
            }
            Err(EngineError::VersionConflict { actual, .. }) => {
                tracing::warn!(
                    investigation_id = %state.investigation_id,
                    expected = *version,
                    actual,
                    "version conflict, retrying once with current version"
                );
                *version = self.store.update(&state.investigation_id, state, actual)?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn publish(&self, state: &InvestigationState, kind: EventKind, payload: serde_json::Value) {
        if let Some(events) = &self.events {
            events.publish(&state.investigation_id, kind, payload);
        }
    }
}
