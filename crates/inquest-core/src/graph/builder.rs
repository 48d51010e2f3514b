//! Graph construction with up-front validation.
//!
//! Dangling edges, duplicate nodes, and a missing start node are rejected at
//! build time; the engine never discovers a bad edge mid-execution.

use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::state::Domain;

use super::{EdgePredicate, EdgeSpec, GraphSpec, NodeKind, NodeSpec};

#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeSpec>,
    edges: Vec<EdgeSpec>,
    required_domains: Vec<Domain>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, name: impl Into<String>, kind: NodeKind) -> Self {
        self.nodes.push(NodeSpec {
            name: name.into(),
            kind,
        });
        self
    }

    /// Edges are evaluated in declaration order; earlier means higher
    /// priority.
    pub fn edge(
        mut self,
        from: impl Into<String>,
        predicate: EdgePredicate,
        to: impl Into<String>,
    ) -> Self {
        self.edges.push(EdgeSpec {
            from: from.into(),
            predicate,
            to: to.into(),
        });
        self
    }

    pub fn required_domains(mut self, domains: Vec<Domain>) -> Self {
        self.required_domains = domains;
        self
    }

    pub fn build(self) -> Result<GraphSpec> {
        let mut nodes = BTreeMap::new();
        let mut start_count = 0usize;

        for node in self.nodes {
            if matches!(node.kind, NodeKind::Start) {
                start_count += 1;
            }
            if nodes.insert(node.name.clone(), node.clone()).is_some() {
                return Err(EngineError::GraphValidation(format!(
                    "duplicate node '{}'",
                    node.name
                )));
            }
        }

        if start_count != 1 {
            return Err(EngineError::GraphValidation(format!(
                "expected exactly one start node, found {start_count}"
            )));
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !nodes.contains_key(endpoint) {
                    return Err(EngineError::GraphValidation(format!(
                        "edge {} -> {} references unknown node '{}'",
                        edge.from, edge.to, endpoint
                    )));
                }
            }
            if matches!(nodes[&edge.from].kind, NodeKind::Terminal(_)) {
                return Err(EngineError::GraphValidation(format!(
                    "terminal node '{}' must not have outgoing edges",
                    edge.from
                )));
            }
        }

        // Every non-terminal node that the loop can land on needs a way out.
        for (name, node) in &nodes {
            if matches!(node.kind, NodeKind::Terminal(_)) {
                continue;
            }
            let outgoing: Vec<&EdgeSpec> =
                self.edges.iter().filter(|e| &e.from == name).collect();
            if outgoing.is_empty() {
                return Err(EngineError::GraphValidation(format!(
                    "node '{name}' has no outgoing edges"
                )));
            }
            if matches!(node.kind, NodeKind::Orchestrate | NodeKind::Summary)
                && !outgoing
                    .last()
                    .is_some_and(|e| e.predicate == EdgePredicate::Always)
            {
                return Err(EngineError::GraphValidation(format!(
                    "node '{name}' needs an unconditional fallback edge"
                )));
            }
        }

        for domain in &self.required_domains {
            let node_name = GraphSpec::domain_node_name(domain);
            if !nodes.contains_key(&node_name) {
                return Err(EngineError::GraphValidation(format!(
                    "required domain '{domain}' has no analysis node"
                )));
            }
        }

        Ok(GraphSpec::new(nodes, self.edges, self.required_domains))
    }
}
