// src/dag/scheduler.rs

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::graph::StepGraph;
use crate::dag::node_state::{NodeState, SkipReason, StepStatus};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::dag::StepId;
use crate::engine::StepOutcome;
use crate::fingerprint::{FingerprintReport, Unavailability};

/// Scheduler holds the immutable step graph plus mutable per-run state.
///
/// It is responsible for:
/// - deciding when a step is ready (every producer succeeded)
/// - handing ready steps out while respecting the concurrency limit
/// - recording success and failure
/// - skipping the dependent subtree of a failed or skipped step
///
/// It performs no IO; the runtime feeds it completions.
#[derive(Debug)]
pub struct Scheduler {
    graph: StepGraph,
    nodes: HashMap<StepId, NodeState>,
    /// Unavailable steps waiting to be skipped by [`Scheduler::start`].
    unavailable: HashMap<StepId, Unavailability>,
    max_concurrency: usize,
    running: usize,
    cancelled: bool,
}

impl Scheduler {
    /// Construct a scheduler for a validated graph and its fingerprints.
    ///
    /// `max_concurrency` is clamped to at least 1.
    pub fn new(graph: StepGraph, report: &FingerprintReport, max_concurrency: usize) -> Self {
        let mut nodes = HashMap::new();
        for id in graph.topo_order() {
            let deps = graph.dependencies_of(id).to_vec();
            let fingerprint = report.fingerprint_of(id).cloned();
            nodes.insert(id.clone(), NodeState::new(id.clone(), deps, fingerprint));
        }

        Self {
            graph,
            nodes,
            unavailable: report.unavailable.clone(),
            max_concurrency: max_concurrency.max(1),
            running: 0,
            cancelled: false,
        }
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of steps currently dispatched and not yet completed.
    pub fn running(&self) -> usize {
        self.running
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn status_of(&self, step: &str) -> Option<StepStatus> {
        self.nodes.get(step).map(|n| n.status)
    }

    pub fn node(&self, step: &str) -> Option<&NodeState> {
        self.nodes.get(step)
    }

    /// Node states in topological order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeState> {
        self.graph
            .topo_order()
            .iter()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Whether every node has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_terminal())
    }

    /// Begin the run: skip steps that could not be fingerprinted and dispatch
    /// the initial ready set.
    pub fn start(&mut self) -> SchedulerStep {
        let mut newly_skipped = Vec::new();
        let unavailable = std::mem::take(&mut self.unavailable);

        {
            let mut manager = StateManager::new(&self.graph, &mut self.nodes);
            for id in self.graph.topo_order() {
                let reason = match unavailable.get(id) {
                    Some(Unavailability::Input(err)) => SkipReason::InputUnavailable(err.clone()),
                    Some(Unavailability::Upstream(producer)) => {
                        SkipReason::UpstreamUnavailable(producer.clone())
                    }
                    None => continue,
                };
                if manager.mark_skipped(id, reason) {
                    newly_skipped.push(id.clone());
                    newly_skipped.extend(manager.mark_dependents_skipped(id));
                }
            }
        }

        info!(
            steps = self.nodes.len(),
            skipped = newly_skipped.len(),
            max_concurrency = self.max_concurrency,
            "scheduler: starting run"
        );

        let mut step = self.advance();
        newly_skipped.append(&mut step.newly_skipped);
        step.newly_skipped = newly_skipped;
        step
    }

    /// Handle completion of a dispatched step.
    pub fn step_completion(&mut self, step: &str, outcome: StepOutcome) -> SchedulerStep {
        let mut newly_skipped = Vec::new();

        match self.nodes.get_mut(step) {
            Some(node) if node.status == StepStatus::Running => {
                self.running = self.running.saturating_sub(1);
                match outcome {
                    StepOutcome::Succeeded { outputs, cached } => {
                        debug!(step = %node.id, cached, "step succeeded");
                        node.status = StepStatus::Succeeded;
                        node.outputs = outputs;
                        node.cached = cached;
                    }
                    StepOutcome::Failed(err) => {
                        warn!(
                            step = %node.id,
                            error = %err,
                            "step failed; skipping dependents"
                        );
                        node.status = StepStatus::Failed;
                        node.failure = Some(err);
                        let mut manager = StateManager::new(&self.graph, &mut self.nodes);
                        newly_skipped = manager.mark_dependents_skipped(step);
                    }
                }
            }
            Some(node) => {
                warn!(
                    step = %step,
                    status = %node.status,
                    "completion for a step that is not running; ignoring"
                );
            }
            None => {
                warn!(step = %step, "completion for unknown step; ignoring");
            }
        }

        let mut next = self.advance();
        newly_skipped.append(&mut next.newly_skipped);
        next.newly_skipped = newly_skipped;
        next
    }

    /// Stop dispatching. Every step that has not started is skipped;
    /// running steps are left for their completions to arrive.
    pub fn cancel(&mut self) -> SchedulerStep {
        self.cancelled = true;

        let pending: Vec<StepId> = self
            .graph
            .topo_order()
            .iter()
            .filter(|id| {
                self.nodes
                    .get(id.as_str())
                    .is_some_and(|n| matches!(n.status, StepStatus::Pending | StepStatus::Ready))
            })
            .cloned()
            .collect();

        let mut manager = StateManager::new(&self.graph, &mut self.nodes);
        let newly_skipped: Vec<StepId> = pending
            .into_iter()
            .filter(|id| manager.mark_skipped(id, SkipReason::Cancelled))
            .collect();

        info!(
            skipped = newly_skipped.len(),
            running = self.running,
            "scheduler: run cancelled"
        );

        SchedulerStep {
            dispatched: Vec::new(),
            newly_skipped,
            run_finished: self.is_finished(),
        }
    }

    /// Promote newly ready steps and fill free worker slots.
    fn advance(&mut self) -> SchedulerStep {
        if self.cancelled {
            return SchedulerStep {
                dispatched: Vec::new(),
                newly_skipped: Vec::new(),
                run_finished: self.is_finished(),
            };
        }

        let slots = self.max_concurrency.saturating_sub(self.running);
        let mut manager = StateManager::new(&self.graph, &mut self.nodes);
        manager.promote_ready();
        let (dispatched, newly_skipped) = manager.dispatch_ready(slots);
        let run_finished = manager.all_terminal();
        self.running += dispatched.len();

        if run_finished {
            info!("scheduler: all steps terminal; run finished");
        }

        SchedulerStep {
            dispatched,
            newly_skipped,
            run_finished,
        }
    }
}
