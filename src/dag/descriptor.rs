// src/dag/descriptor.rs

//! Step descriptors: the declarative unit the engine schedules.
//!
//! A descriptor says nothing about *what* the external tool does; it only
//! carries identity, resolved parameters, declared inputs/outputs and an
//! opaque command template.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical step identifier type used throughout the engine.
pub type StepId = String;

/// A fully resolved parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl fmt::Display for ParamValue {
    /// Rendering used when the value is substituted into a command line.
    /// Lists are joined with `,`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v.into())
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Vec<ParamValue>> for ParamValue {
    fn from(v: Vec<ParamValue>) -> Self {
        ParamValue::List(v)
    }
}

/// Where an input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A file or directory outside the graph.
    External(PathBuf),
    /// A named output of another step.
    Step { step: StepId, output: String },
}

/// A named input of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub name: String,
    pub source: InputSource,
}

/// A named output slot, relative to the step's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSlot {
    pub name: String,
    pub path: PathBuf,
}

/// Opaque invocation template.
///
/// `args` and `env` values may contain `{inputs.<name>}`,
/// `{outputs.<name>}` and `{params.<name>}` placeholders which are filled in
/// with concrete paths and values at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Declarative description of one processing step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDescriptor {
    pub id: StepId,
    pub parameters: BTreeMap<String, ParamValue>,
    pub inputs: Vec<InputBinding>,
    pub outputs: Vec<OutputSlot>,
    pub command: CommandTemplate,
    /// Optional wall-clock limit; a timed-out step is treated as failed.
    pub timeout: Option<Duration>,
}

impl StepDescriptor {
    pub fn new(id: impl Into<StepId>, command: CommandTemplate) -> Self {
        Self {
            id: id.into(),
            parameters: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            command,
            timeout: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn external_input(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(InputBinding {
            name: name.into(),
            source: InputSource::External(path.into()),
        });
        self
    }

    pub fn step_input(
        mut self,
        name: impl Into<String>,
        step: impl Into<StepId>,
        output: impl Into<String>,
    ) -> Self {
        self.inputs.push(InputBinding {
            name: name.into(),
            source: InputSource::Step {
                step: step.into(),
                output: output.into(),
            },
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(OutputSlot {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn output_slot(&self, name: &str) -> Option<&OutputSlot> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Ids of the producer steps this step reads from (may repeat).
    pub fn upstream_steps(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(|input| match &input.source {
            InputSource::Step { step, .. } => Some(step.as_str()),
            InputSource::External(_) => None,
        })
    }
}
