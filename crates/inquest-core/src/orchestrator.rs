//! Single-threaded orchestrator decision node.
//!
//! One decision is in flight per investigation at any time. Each invocation
//! observes the loop counter at entry and checks the bound *before* any
//! further work is dispatched, so `orchestrator_loops` can never exceed
//! `max_loops`, even transiently. The counter is incremented only for
//! invocations that go on to dispatch.

use std::sync::Arc;

use crate::graph::{EdgePredicate, GraphSpec, LoopLimits, NodeKind};
use crate::state::{CompletionReason, Domain, InvestigationState};

/// What the engine should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Loop bound reached: transition straight to summary without executing
    /// any node body for this iteration.
    ForceSummary(CompletionReason),
    /// Fan out over these unvisited domains (bounded parallelism), then
    /// merge serially.
    RunDomains(Vec<Domain>),
    ValidateSafety,
    Summarize,
}

pub struct Orchestrator {
    graph: Arc<GraphSpec>,
    limits: LoopLimits,
}

impl Orchestrator {
    pub fn new(graph: Arc<GraphSpec>, limits: LoopLimits) -> Self {
        Self { graph, limits }
    }

    pub fn limits(&self) -> &LoopLimits {
        &self.limits
    }

    /// One orchestrator invocation. Mutates only the loop counter and, when
    /// the bound fires, the completion reason.
    pub fn next(&self, state: &mut InvestigationState) -> Decision {
        if state.orchestrator_loops >= self.limits.max_loops {
            tracing::info!(
                investigation_id = %state.investigation_id,
                loops = state.orchestrator_loops,
                max_loops = self.limits.max_loops,
                "loop bound reached, forcing summary"
            );
            state.completion_reason = Some(CompletionReason::MaxLoopsReached);
            return Decision::ForceSummary(CompletionReason::MaxLoopsReached);
        }

        state.orchestrator_loops += 1;

        for edge in self.graph.edges_from("orchestrate") {
            // The entry check above owns the bound. Its declarative twin in
            // the graph must not re-fire against the post-increment counter,
            // or the Nth invocation would summarize instead of dispatching.
            if edge.predicate == EdgePredicate::LoopBoundReached {
                continue;
            }
            if !edge.predicate.eval(state, &self.graph, &self.limits) {
                continue;
            }
            let Some(target) = self.graph.node(&edge.to) else {
                continue; // builder validation makes this unreachable
            };
            match &target.kind {
                NodeKind::DomainAnalysis(_) => {
                    let pending = self.graph.pending_domains(state, &self.limits);
                    tracing::debug!(
                        investigation_id = %state.investigation_id,
                        loop_no = state.orchestrator_loops,
                        pending = pending.len(),
                        "dispatching domain analysis"
                    );
                    return Decision::RunDomains(pending);
                }
                NodeKind::SafetyValidation => return Decision::ValidateSafety,
                NodeKind::Summary => return Decision::Summarize,
                _ => continue,
            }
        }

        Decision::Summarize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EntityRef;

    fn orchestrator(max_loops: u32) -> Orchestrator {
        let domains = vec![Domain::from("network"), Domain::from("device")];
        let graph = Arc::new(GraphSpec::standard(&domains).unwrap());
        Orchestrator::new(
            graph,
            LoopLimits {
                max_loops,
                max_domain_attempts: 2,
            },
        )
    }

    fn fresh_state() -> InvestigationState {
        InvestigationState::new(EntityRef::new("account", "acct_1"))
    }

    #[test]
    fn prioritizes_pending_domains() {
        let orch = orchestrator(8);
        let mut state = fresh_state();

        match orch.next(&mut state) {
            Decision::RunDomains(domains) => {
                assert_eq!(domains.len(), 2);
            }
            other => panic!("expected RunDomains, got {other:?}"),
        }
        assert_eq!(state.orchestrator_loops, 1);
    }

    #[test]
    fn routes_to_safety_once_domains_are_done() {
        let orch = orchestrator(8);
        let mut state = fresh_state();
        state.domains_completed = vec![Domain::from("network"), Domain::from("device")];

        assert_eq!(orch.next(&mut state), Decision::ValidateSafety);
    }

    #[test]
    fn summarizes_after_safety_resolution() {
        let orch = orchestrator(8);
        let mut state = fresh_state();
        state.domains_completed = vec![Domain::from("network"), Domain::from("device")];
        state.safety_validated = true;

        assert_eq!(orch.next(&mut state), Decision::Summarize);
    }

    #[test]
    fn pending_overrides_pull_back_into_safety() {
        let orch = orchestrator(8);
        let mut state = fresh_state();
        state.domains_completed = vec![Domain::from("network"), Domain::from("device")];
        state.safety_validated = true;
        state.safety_overrides.push(crate::state::SafetyOverride {
            rule: "score_range".to_string(),
            detail: "risk out of range".to_string(),
            at: chrono::Utc::now(),
            resolved: false,
        });

        assert_eq!(orch.next(&mut state), Decision::ValidateSafety);
    }

    // Scenario: max_loops = 8, orchestrator invoked 9 times synthetically.
    // On the 9th invocation the counter reads 8 at entry, the bound check
    // fires before any dispatch, and the reason is recorded.
    #[test]
    fn ninth_invocation_hits_the_bound_without_dispatch() {
        let orch = orchestrator(8);
        let mut state = fresh_state();
        // Keep domains pending forever so every loop dispatches. All eight
        // budgeted invocations must dispatch, including the eighth.
        for i in 1..=8 {
            let decision = orch.next(&mut state);
            assert!(
                matches!(decision, Decision::RunDomains(_)),
                "invocation {i} should dispatch, got {decision:?}"
            );
            assert_eq!(state.orchestrator_loops, i);
        }

        assert_eq!(state.orchestrator_loops, 8);
        let decision = orch.next(&mut state);
        assert_eq!(
            decision,
            Decision::ForceSummary(CompletionReason::MaxLoopsReached)
        );
        // No increment past the bound, no dispatch.
        assert_eq!(state.orchestrator_loops, 8);
        assert_eq!(
            state.completion_reason,
            Some(CompletionReason::MaxLoopsReached)
        );
    }

    #[test]
    fn loop_counter_never_exceeds_bound() {
        let orch = orchestrator(3);
        let mut state = fresh_state();
        for _ in 0..20 {
            let _ = orch.next(&mut state);
            assert!(state.orchestrator_loops <= 3);
        }
    }
}
