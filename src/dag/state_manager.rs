// src/dag/state_manager.rs

//! Per-run state transitions for steps in the scheduler.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::dag::descriptor::{InputSource, StepId};
use crate::dag::graph::StepGraph;
use crate::dag::node_state::{NodeState, ScheduledStep, SkipReason, StepStatus};

/// Manages per-run state transitions for steps.
pub struct StateManager<'a> {
    graph: &'a StepGraph,
    nodes: &'a mut HashMap<StepId, NodeState>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a StepGraph, nodes: &'a mut HashMap<StepId, NodeState>) -> Self {
        Self { graph, nodes }
    }

    /// Mark a single node skipped if it has not started yet.
    ///
    /// Returns `true` if the node transitioned.
    pub fn mark_skipped(&mut self, step: &str, reason: SkipReason) -> bool {
        match self.nodes.get_mut(step) {
            Some(node) if matches!(node.status, StepStatus::Pending | StepStatus::Ready) => {
                debug!(step = %node.id, reason = %reason, "marking Skipped");
                node.status = StepStatus::Skipped;
                node.skip_reason = Some(reason);
                true
            }
            Some(_) => false,
            None => {
                warn!(step = %step, "node in DAG not present in state map");
                false
            }
        }
    }

    /// Skip every not-yet-started step downstream of `root` (which is Failed
    /// or Skipped).
    ///
    /// Each dependent's reason names the direct producer that blocked it.
    /// Returns the ids of the newly skipped steps.
    pub fn mark_dependents_skipped(&mut self, root: &str) -> Vec<StepId> {
        let mut stack: Vec<(StepId, StepId)> = self
            .graph
            .dependents_of(root)
            .iter()
            .map(|d| (d.clone(), root.to_string()))
            .collect();
        let mut visited: HashSet<StepId> = HashSet::new();
        let mut newly_skipped = Vec::new();

        while let Some((name, producer)) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }

            let Some(reason) = self.blocked_reason(&producer) else {
                continue;
            };

            if self.mark_skipped(&name, reason) {
                newly_skipped.push(name.clone());
                stack.extend(
                    self.graph
                        .dependents_of(&name)
                        .iter()
                        .map(|d| (d.clone(), name.clone())),
                );
            }
        }

        newly_skipped
    }

    /// Skip reason a dependent inherits from a blocked producer.
    fn blocked_reason(&self, producer: &str) -> Option<SkipReason> {
        let node = self.nodes.get(producer)?;
        match node.status {
            StepStatus::Failed => Some(SkipReason::UpstreamFailed(producer.to_string())),
            StepStatus::Skipped => Some(match node.skip_reason {
                Some(SkipReason::InputUnavailable(_))
                | Some(SkipReason::UpstreamUnavailable(_)) => {
                    SkipReason::UpstreamUnavailable(producer.to_string())
                }
                Some(SkipReason::Cancelled) => SkipReason::Cancelled,
                _ => SkipReason::UpstreamSkipped(producer.to_string()),
            }),
            _ => None,
        }
    }

    /// Promote `Pending` nodes whose producers have all succeeded to `Ready`.
    pub fn promote_ready(&mut self) {
        let candidates: Vec<StepId> = self
            .nodes
            .values()
            .filter(|node| node.status == StepStatus::Pending && self.deps_succeeded(node))
            .map(|node| node.id.clone())
            .collect();

        for name in candidates {
            if let Some(node) = self.nodes.get_mut(&name) {
                debug!(step = %node.id, "dependencies satisfied; marking Ready");
                node.status = StepStatus::Ready;
            }
        }
    }

    fn deps_succeeded(&self, node: &NodeState) -> bool {
        node.deps.iter().all(|dep| {
            self.nodes
                .get(dep)
                .is_some_and(|d| d.status == StepStatus::Succeeded)
        })
    }

    /// Move up to `slots` `Ready` nodes to `Running`, in topological order,
    /// and return them as [`ScheduledStep`]s.
    ///
    /// A ready step whose inputs cannot all be resolved is skipped along with
    /// its dependents instead; those ids are returned as the second element.
    pub fn dispatch_ready(&mut self, slots: usize) -> (Vec<ScheduledStep>, Vec<StepId>) {
        let mut dispatched = Vec::new();
        let mut skipped = Vec::new();
        if slots == 0 {
            return (dispatched, skipped);
        }

        let graph = self.graph;
        let ready: Vec<StepId> = graph
            .topo_order()
            .iter()
            .filter(|id| {
                self.nodes
                    .get(id.as_str())
                    .is_some_and(|n| n.status == StepStatus::Ready)
            })
            .cloned()
            .collect();

        for name in ready {
            if dispatched.len() == slots {
                break;
            }
            let Some(descriptor) = graph.descriptor(&name) else {
                continue;
            };

            let mut inputs = BTreeMap::new();
            let mut unresolved = None;
            for input in &descriptor.inputs {
                match &input.source {
                    InputSource::External(path) => {
                        inputs.insert(input.name.clone(), path.clone());
                    }
                    InputSource::Step { step, output } => {
                        match self.nodes.get(step).and_then(|n| n.outputs.get(output)) {
                            Some(path) => {
                                inputs.insert(input.name.clone(), path.clone());
                            }
                            None => {
                                warn!(
                                    step = %name,
                                    input = %input.name,
                                    producer = %step,
                                    "upstream output location unknown at dispatch; skipping"
                                );
                                unresolved = Some(SkipReason::UpstreamOutputUnknown {
                                    step: step.clone(),
                                    output: output.clone(),
                                });
                                break;
                            }
                        }
                    }
                }
            }

            let Some(node) = self.nodes.get_mut(&name) else {
                continue;
            };
            let fingerprint = match (unresolved, node.fingerprint.clone()) {
                (None, Some(fingerprint)) => fingerprint,
                (reason, None) => {
                    warn!(step = %name, "ready step has no fingerprint; skipping");
                    node.status = StepStatus::Skipped;
                    node.skip_reason =
                        Some(reason.unwrap_or_else(|| SkipReason::UpstreamUnavailable(name.clone())));
                    skipped.push(name);
                    continue;
                }
                (Some(reason), Some(_)) => {
                    node.status = StepStatus::Skipped;
                    node.skip_reason = Some(reason);
                    skipped.push(name);
                    continue;
                }
            };

            info!(step = %name, fingerprint = %fingerprint.short(), "dispatching step");
            node.status = StepStatus::Running;
            dispatched.push(ScheduledStep {
                id: name,
                fingerprint,
                descriptor: descriptor.clone(),
                inputs,
            });
        }

        let mut newly_skipped = skipped.clone();
        for name in &skipped {
            newly_skipped.extend(self.mark_dependents_skipped(name));
        }

        (dispatched, newly_skipped)
    }

    /// Check if all nodes are in a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_terminal())
    }
}
