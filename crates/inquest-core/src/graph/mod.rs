//! Immutable investigation task graph.
//!
//! The cyclic graph (orchestrate -> domain agents -> orchestrate) is an
//! explicit, validated node/edge table rather than recursive graph objects.
//! Built once at startup by `GraphBuilder`; never mutated after validation.

mod builder;

pub use builder::GraphBuilder;

use std::collections::BTreeMap;

use crate::state::{Domain, InvestigationState, Phase};

/// Loop and retry limits the transition predicates evaluate against.
#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    /// Maximum orchestrator re-entries before forced finalization.
    pub max_loops: u32,
    /// Dispatch attempts per domain before it stops being re-scheduled.
    pub max_domain_attempts: u32,
}

/// What the engine executes when the orchestrator lands on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Start,
    FetchData,
    DomainAnalysis(Domain),
    Orchestrate,
    SafetyValidation,
    Summary,
    Terminal(Phase),
}

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
}

/// Transition predicate attached to an edge. Evaluated against the merged
/// state only; predicates never mutate anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePredicate {
    Always,
    /// The loop bound is part of the transition function, not an afterthought.
    LoopBoundReached,
    /// At least one required domain is neither completed nor out of attempts.
    DomainsPending,
    /// Safety validation has not run yet, or overrides await resolution.
    SafetyPending,
    /// Zero domains completed; the terminal phase becomes `failed`.
    ZeroCoverage,
}

impl EdgePredicate {
    pub fn eval(&self, state: &InvestigationState, graph: &GraphSpec, limits: &LoopLimits) -> bool {
        match self {
            EdgePredicate::Always => true,
            EdgePredicate::LoopBoundReached => state.orchestrator_loops >= limits.max_loops,
            EdgePredicate::DomainsPending => !graph.pending_domains(state, limits).is_empty(),
            EdgePredicate::SafetyPending => {
                !state.safety_validated || state.has_pending_overrides()
            }
            EdgePredicate::ZeroCoverage => state.domains_completed.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub from: String,
    pub predicate: EdgePredicate,
    pub to: String,
}

/// The validated node/edge table. Edge order encodes transition priority.
#[derive(Debug, Clone)]
pub struct GraphSpec {
    nodes: BTreeMap<String, NodeSpec>,
    edges: Vec<EdgeSpec>,
    required_domains: Vec<Domain>,
}

impl GraphSpec {
    pub(crate) fn new(
        nodes: BTreeMap<String, NodeSpec>,
        edges: Vec<EdgeSpec>,
        required_domains: Vec<Domain>,
    ) -> Self {
        Self {
            nodes,
            edges,
            required_domains,
        }
    }

    /// The canonical investigation graph over the given domains:
    /// start -> fetch_data -> orchestrate, with the orchestrate node cycling
    /// through domain analysis and safety validation until summary.
    pub fn standard(domains: &[Domain]) -> crate::error::Result<Self> {
        let mut builder = GraphBuilder::new()
            .node("start", NodeKind::Start)
            .node("fetch_data", NodeKind::FetchData)
            .node("orchestrate", NodeKind::Orchestrate)
            .node("safety_validation", NodeKind::SafetyValidation)
            .node("summary", NodeKind::Summary)
            .node("completed", NodeKind::Terminal(Phase::Completed))
            .node("failed", NodeKind::Terminal(Phase::Failed))
            .edge("start", EdgePredicate::Always, "fetch_data")
            .edge("fetch_data", EdgePredicate::Always, "orchestrate")
            .edge("orchestrate", EdgePredicate::LoopBoundReached, "summary");

        for domain in domains {
            let name = Self::domain_node_name(domain);
            builder = builder
                .node(&name, NodeKind::DomainAnalysis(domain.clone()))
                .edge("orchestrate", EdgePredicate::DomainsPending, &name)
                .edge(&name, EdgePredicate::Always, "orchestrate");
        }

        builder
            .edge("orchestrate", EdgePredicate::SafetyPending, "safety_validation")
            .edge("safety_validation", EdgePredicate::Always, "orchestrate")
            .edge("orchestrate", EdgePredicate::Always, "summary")
            .edge("summary", EdgePredicate::ZeroCoverage, "failed")
            .edge("summary", EdgePredicate::Always, "completed")
            .required_domains(domains.to_vec())
            .build()
    }

    pub fn domain_node_name(domain: &Domain) -> String {
        format!("domain:{domain}")
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.get(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn required_domains(&self) -> &[Domain] {
        &self.required_domains
    }

    /// Outgoing edges of a node in declaration (priority) order.
    pub fn edges_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EdgeSpec> {
        self.edges.iter().filter(move |edge| edge.from == name)
    }

    /// Required domains that are neither completed nor out of attempts.
    pub fn pending_domains(
        &self,
        state: &InvestigationState,
        limits: &LoopLimits,
    ) -> Vec<Domain> {
        self.required_domains
            .iter()
            .filter(|domain| {
                !state.domain_completed(domain)
                    && state.attempts_for(domain) < limits.max_domain_attempts
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EntityRef;

    fn limits() -> LoopLimits {
        LoopLimits {
            max_loops: 8,
            max_domain_attempts: 2,
        }
    }

    #[test]
    fn standard_graph_has_expected_shape() {
        let domains = vec![Domain::from("network"), Domain::from("device")];
        let graph = GraphSpec::standard(&domains).unwrap();

        assert_eq!(graph.node_count(), 9);
        assert!(graph.node("domain:network").is_some());
        assert!(graph.node("domain:device").is_some());

        // The bound check is the highest-priority orchestrate edge.
        let first = graph.edges_from("orchestrate").next().unwrap();
        assert_eq!(first.predicate, EdgePredicate::LoopBoundReached);
        assert_eq!(first.to, "summary");

        // Orchestrate always has a fallback.
        let last = graph.edges_from("orchestrate").last().unwrap();
        assert_eq!(last.predicate, EdgePredicate::Always);
    }

    #[test]
    fn pending_domains_respects_attempt_budget() {
        let domains = vec![Domain::from("network")];
        let graph = GraphSpec::standard(&domains).unwrap();
        let mut state = InvestigationState::new(EntityRef::new("account", "a"));

        assert_eq!(graph.pending_domains(&state, &limits()).len(), 1);

        state.domain_attempts.insert(Domain::from("network"), 2);
        assert!(graph.pending_domains(&state, &limits()).is_empty());
    }

    #[test]
    fn zero_coverage_routes_summary_to_failed() {
        let domains = vec![Domain::from("network")];
        let graph = GraphSpec::standard(&domains).unwrap();
        let state = InvestigationState::new(EntityRef::new("account", "a"));
        let lim = limits();

        let target = graph
            .edges_from("summary")
            .find(|edge| edge.predicate.eval(&state, &graph, &lim))
            .map(|edge| edge.to.clone());
        assert_eq!(target.as_deref(), Some("failed"));
    }
}
