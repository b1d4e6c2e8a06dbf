// src/exec/template.rs

//! Command template placeholders.
//!
//! Templates reference declared inputs, outputs and parameters with
//! `{inputs.<name>}`, `{outputs.<name>}` and `{params.<name>}`. The Graph
//! Builder checks every placeholder up front via [`placeholders`]; the
//! Working-Directory Manager fills in concrete values via [`render`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::dag::{ParamValue, StepDescriptor};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_]+)\.([A-Za-z0-9_\-]+)\}").expect("placeholder regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    Input,
    Output,
    Param,
}

/// A placeholder occurrence in a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// `None` when the prefix is not one of `inputs`, `outputs`, `params`.
    pub kind: Option<PlaceholderKind>,
    pub name: String,
    /// The full placeholder text, e.g. `{inputs.t1}`.
    pub raw: String,
}

/// All placeholders found in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<Placeholder> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| {
            let kind = match &caps[1] {
                "inputs" => Some(PlaceholderKind::Input),
                "outputs" => Some(PlaceholderKind::Output),
                "params" => Some(PlaceholderKind::Param),
                _ => None,
            };
            Placeholder {
                kind,
                name: caps[2].to_string(),
                raw: caps[0].to_string(),
            }
        })
        .collect()
}

/// Find the first placeholder in the step's command that does not refer to a
/// declared input, output or parameter.
pub fn first_unknown_placeholder(step: &StepDescriptor) -> Option<String> {
    let cmd = &step.command;
    let strings = std::iter::once(cmd.program.as_str())
        .chain(cmd.args.iter().map(String::as_str))
        .chain(cmd.env.values().map(String::as_str));

    for s in strings {
        for ph in placeholders(s) {
            let known = match ph.kind {
                Some(PlaceholderKind::Input) => step.inputs.iter().any(|i| i.name == ph.name),
                Some(PlaceholderKind::Output) => step.outputs.iter().any(|o| o.name == ph.name),
                Some(PlaceholderKind::Param) => step.parameters.contains_key(&ph.name),
                None => false,
            };
            if !known {
                return Some(ph.raw);
            }
        }
    }
    None
}

/// Concrete values available for substitution.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext<'a> {
    pub inputs: BTreeMap<String, PathBuf>,
    pub outputs: BTreeMap<String, PathBuf>,
    pub params: Option<&'a BTreeMap<String, ParamValue>>,
}

/// Substitute placeholders in a single template string.
///
/// Placeholders that cannot be resolved are left untouched; the Graph Builder
/// already rejected unknown names.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[2];
            let value = match &caps[1] {
                "inputs" => ctx.inputs.get(name).map(|p| path_arg(p)),
                "outputs" => ctx.outputs.get(name).map(|p| path_arg(p)),
                "params" => ctx
                    .params
                    .and_then(|params| params.get(name))
                    .map(|v| v.to_string()),
                _ => None,
            };
            value.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
