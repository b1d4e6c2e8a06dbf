#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tractflow::dag::{CommandTemplate, StepDescriptor};

/// Program name used by steps built here; only `FakeInvoker` ever "runs" it.
pub const FAKE_PROGRAM: &str = "fake-tool";

/// Builder for `StepDescriptor`s with the conventions the tests rely on:
/// every step has an `out` slot at `<id>.out` unless told otherwise, and
/// `after(x)` reads `x.out` under the input name `x`.
pub struct StepBuilder {
    step: StepDescriptor,
    default_output: bool,
}

impl StepBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            step: StepDescriptor::new(id, CommandTemplate::new(FAKE_PROGRAM)),
            default_output: true,
        }
    }

    /// Read the `out` slot of `producer`.
    pub fn after(mut self, producer: &str) -> Self {
        self.step = self.step.step_input(producer, producer, "out");
        self
    }

    pub fn external(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.step = self.step.external_input(name, path);
        self
    }

    pub fn output(mut self, name: &str, path: &str) -> Self {
        self.default_output = false;
        self.step = self.step.output(name, path);
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<tractflow::dag::ParamValue>) -> Self {
        self.step = self.step.param(name, value);
        self
    }

    pub fn program(mut self, program: &str) -> Self {
        self.step.command.program = program.to_string();
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.step.command.args.push(arg.to_string());
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.step = self.step.timeout(timeout);
        self
    }

    pub fn build(self) -> StepDescriptor {
        let mut step = self.step;
        if self.default_output {
            let file = format!("{}.out", step.id);
            step = step.output("out", file);
        }
        step
    }
}

/// Collects steps and writes external input files under a root directory.
pub struct PipelineBuilder {
    root: PathBuf,
    steps: Vec<StepDescriptor>,
}

impl PipelineBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            steps: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `<root>/inputs/<name>` and return its path.
    pub fn input_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root.join("inputs").join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create input dir");
        }
        fs::write(&path, contents).expect("write input file");
        path
    }

    pub fn step(mut self, step: StepBuilder) -> Self {
        self.steps.push(step.build());
        self
    }

    pub fn descriptor(mut self, step: StepDescriptor) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Vec<StepDescriptor> {
        self.steps
    }
}

/// `a -> b -> c`, where `a` reads `input`.
pub fn chain(input: &Path) -> Vec<StepDescriptor> {
    vec![
        StepBuilder::new("a").external("src", input).build(),
        StepBuilder::new("b").after("a").build(),
        StepBuilder::new("c").after("b").build(),
    ]
}

/// `a -> {b, c} -> d`, where `a` reads `input`.
pub fn diamond(input: &Path) -> Vec<StepDescriptor> {
    vec![
        StepBuilder::new("a").external("src", input).build(),
        StepBuilder::new("b").after("a").build(),
        StepBuilder::new("c").after("a").build(),
        StepBuilder::new("d").after("b").after("c").build(),
    ]
}
