// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use petgraph::dot::Dot;
use petgraph::graph::DiGraph;

use crate::dag::descriptor::{InputSource, StepDescriptor, StepId};

/// Internal node structure: the descriptor plus immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    descriptor: StepDescriptor,
    /// Distinct producer steps this step reads from.
    deps: Vec<StepId>,
    /// Steps that read at least one output of this step.
    dependents: Vec<StepId>,
}

/// Validated, acyclic step graph.
///
/// Only constructed by [`crate::dag::builder::build_graph`], so every
/// reference is known to resolve and the stored topological order is valid.
#[derive(Debug, Clone)]
pub struct StepGraph {
    nodes: HashMap<StepId, DagNode>,
    order: Vec<StepId>,
}

impl StepGraph {
    /// Assemble the graph from descriptors that have already been validated,
    /// together with a topological order over their ids.
    pub(crate) fn from_validated(steps: Vec<StepDescriptor>, order: Vec<StepId>) -> Self {
        let mut nodes: HashMap<StepId, DagNode> = HashMap::new();

        // First pass: create nodes with their dependency lists.
        for descriptor in steps {
            let mut deps: Vec<StepId> = Vec::new();
            for upstream in descriptor.upstream_steps() {
                if !deps.iter().any(|d| d == upstream) {
                    deps.push(upstream.to_string());
                }
            }
            nodes.insert(
                descriptor.id.clone(),
                DagNode {
                    descriptor,
                    deps,
                    dependents: Vec::new(),
                },
            );
        }

        // Second pass: populate dependents, in topological order so that
        // traversal is deterministic.
        for step in &order {
            let deps = nodes.get(step).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(step.clone());
                }
            }
        }

        Self { nodes, order }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, step: &str) -> bool {
        self.nodes.contains_key(step)
    }

    /// Step ids in topological order (producers before consumers).
    pub fn topo_order(&self) -> &[StepId] {
        &self.order
    }

    pub fn descriptor(&self, step: &str) -> Option<&StepDescriptor> {
        self.nodes.get(step).map(|n| &n.descriptor)
    }

    /// Descriptors in topological order.
    pub fn descriptors(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| &n.descriptor))
    }

    /// Immediate upstream producers of a step.
    pub fn dependencies_of(&self, step: &str) -> &[StepId] {
        self.nodes
            .get(step)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate downstream consumers of a step.
    pub fn dependents_of(&self, step: &str) -> &[StepId] {
        self.nodes
            .get(step)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Steps with no upstream producers.
    pub fn roots(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.dependencies_of(id).is_empty())
            .map(|s| s.as_str())
            .collect()
    }

    /// Every step transitively downstream of `step` (excluding itself).
    pub fn descendants_of(&self, step: &str) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents_of(step).iter().map(|s| s.as_str()).collect();

        while let Some(name) = stack.pop() {
            if seen.insert(name.to_string()) {
                stack.extend(self.dependents_of(name).iter().map(|s| s.as_str()));
            }
        }

        seen
    }

    /// Graphviz rendering of the graph; edges are labelled with the output
    /// slot that flows along them.
    pub fn to_dot(&self) -> String {
        let mut g: DiGraph<String, String> = DiGraph::new();
        let mut index = HashMap::new();

        for id in &self.order {
            index.insert(id.as_str(), g.add_node(id.clone()));
        }

        for descriptor in self.descriptors() {
            for input in &descriptor.inputs {
                if let InputSource::Step { step, output } = &input.source {
                    if let (Some(&from), Some(&to)) =
                        (index.get(step.as_str()), index.get(descriptor.id.as_str()))
                    {
                        g.add_edge(from, to, format!("{output} -> {}", input.name));
                    }
                }
            }
        }

        format!("{}", Dot::new(&g))
    }
}
