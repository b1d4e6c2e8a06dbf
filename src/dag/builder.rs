// src/dag/builder.rs

//! Graph Builder: turns a list of step descriptors into a validated
//! [`StepGraph`], or fails with a [`GraphError`] naming the offending step.
//!
//! Pure transformation, no side effects. Checks run in this order:
//! 1. non-empty pipeline, unique step ids
//! 2. per-step shape (outputs, inputs, parameters, placeholders)
//! 3. references (self, unknown step, unknown output)
//! 4. acyclicity

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::descriptor::{InputSource, ParamValue, StepDescriptor};
use crate::dag::graph::StepGraph;
use crate::errors::GraphError;
use crate::exec::process::{STDERR_LOG, STDOUT_LOG};
use crate::exec::template::first_unknown_placeholder;
use crate::workdir::{COMMAND_FILE, INPUTS_DIR};

/// Validate `steps` and assemble the dependency graph.
pub fn build_graph(steps: Vec<StepDescriptor>) -> Result<StepGraph, GraphError> {
    if steps.is_empty() {
        return Err(GraphError::EmptyPipeline);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &steps {
        if !seen.insert(step.id.as_str()) {
            return Err(GraphError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &steps {
        validate_step_shape(step)?;
    }

    validate_references(&steps)?;
    let order = topological_order(&steps)?;

    debug!(steps = steps.len(), "step graph validated");
    Ok(StepGraph::from_validated(steps, order))
}

fn validate_step_shape(step: &StepDescriptor) -> Result<(), GraphError> {
    let mut outputs: HashSet<&str> = HashSet::new();
    for slot in &step.outputs {
        if !outputs.insert(slot.name.as_str()) {
            return Err(GraphError::DuplicateOutput {
                step: step.id.clone(),
                output: slot.name.clone(),
            });
        }
        if !is_contained_relative(&slot.path) || is_reserved(&slot.path) {
            return Err(GraphError::InvalidOutputPath {
                step: step.id.clone(),
                output: slot.name.clone(),
                path: slot.path.clone(),
            });
        }
    }

    let mut inputs: HashSet<&str> = HashSet::new();
    for input in &step.inputs {
        if !inputs.insert(input.name.as_str()) {
            return Err(GraphError::DuplicateInput {
                step: step.id.clone(),
                input: input.name.clone(),
            });
        }
    }

    for (name, value) in &step.parameters {
        if let Some(reason) = invalid_param_reason(value) {
            return Err(GraphError::InvalidParameter {
                step: step.id.clone(),
                param: name.clone(),
                reason,
            });
        }
    }

    if let Some(placeholder) = first_unknown_placeholder(step) {
        return Err(GraphError::UnknownPlaceholder {
            step: step.id.clone(),
            placeholder,
        });
    }

    Ok(())
}

/// Output paths must be non-empty, relative and never climb out of the
/// working directory.
fn is_contained_relative(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}

/// Paths the engine itself writes into every scratch directory. An output
/// declared there would always look present.
fn is_reserved(path: &Path) -> bool {
    let mut parts = path.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part),
        _ => None,
    });
    let Some(first) = parts.next() else {
        return false;
    };
    if first == INPUTS_DIR {
        return true;
    }
    parts.next().is_none() && [COMMAND_FILE, STDOUT_LOG, STDERR_LOG].iter().any(|f| first == *f)
}

fn invalid_param_reason(value: &ParamValue) -> Option<String> {
    match value {
        ParamValue::Float(x) if !x.is_finite() => {
            Some(format!("non-finite float {x} cannot be fingerprinted"))
        }
        ParamValue::List(items) => items.iter().find_map(invalid_param_reason),
        _ => None,
    }
}

fn validate_references(steps: &[StepDescriptor]) -> Result<(), GraphError> {
    let by_id: HashMap<&str, &StepDescriptor> =
        steps.iter().map(|s| (s.id.as_str(), s)).collect();

    for step in steps {
        for input in &step.inputs {
            let InputSource::Step { step: producer, output } = &input.source else {
                continue;
            };

            if producer == &step.id {
                return Err(GraphError::SelfReference {
                    step: step.id.clone(),
                    input: input.name.clone(),
                });
            }

            let Some(producer_desc) = by_id.get(producer.as_str()) else {
                return Err(GraphError::DanglingReference {
                    step: step.id.clone(),
                    input: input.name.clone(),
                    target: format!("step '{producer}'"),
                });
            };

            if producer_desc.output_slot(output).is_none() {
                return Err(GraphError::DanglingReference {
                    step: step.id.clone(),
                    input: input.name.clone(),
                    target: format!("output '{output}' of step '{producer}'"),
                });
            }
        }
    }

    Ok(())
}

fn topological_order(steps: &[StepDescriptor]) -> Result<Vec<String>, GraphError> {
    // Edge direction: producer -> consumer.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for step in steps {
        graph.add_node(step.id.as_str());
    }

    for step in steps {
        for producer in step.upstream_steps() {
            graph.add_edge(producer, step.id.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(GraphError::CyclicDependency {
            step: cycle.node_id().to_string(),
        }),
    }
}
