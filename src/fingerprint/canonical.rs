// src/fingerprint/canonical.rs

//! Canonical text form of step parameters.
//!
//! Keys are emitted in sorted order and every value carries a type tag, so
//! `1`, `1.0` and `"1"` never collide and map iteration order never leaks
//! into a fingerprint.

use std::collections::BTreeMap;

use crate::dag::ParamValue;

/// Canonical encoding of a parameter map, e.g. `{"dof":i:6,"interp":s:"trilinear"}`.
pub fn canonical_params(params: &BTreeMap<String, ParamValue>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();

    let items: Vec<String> = keys
        .into_iter()
        .map(|k| format!("{}:{}", quote(k), canonical_value(&params[k])))
        .collect();
    format!("{{{}}}", items.join(","))
}

/// Canonical encoding of a single value.
pub fn canonical_value(value: &ParamValue) -> String {
    match value {
        ParamValue::Bool(b) => format!("b:{b}"),
        ParamValue::Int(i) => format!("i:{i}"),
        // `{:?}` keeps a trailing `.0` and round-trips exactly.
        ParamValue::Float(x) => format!("f:{x:?}"),
        ParamValue::Str(s) => format!("s:{}", quote(s)),
        ParamValue::List(items) => {
            let items: Vec<String> = items.iter().map(canonical_value).collect();
            format!("l:[{}]", items.join(","))
        }
    }
}

fn quote(s: &str) -> String {
    // serde_json string escaping is total for &str.
    serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
}
