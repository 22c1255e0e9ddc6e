//! Expression evaluation (pipeline stage C1).
//!
//! Runs after the base graph is built. Two jobs:
//!
//! 1. **Metadata substitution**: every attribute value still containing
//!    `var.` / `local.` / `module.` / `data.` tokens is rewritten using
//!    the symbol tables.
//! 2. **Count resolution**: `count`, `for_each`, and `[for …]`
//!    expressions are reduced to integers. Nodes that resolve to zero
//!    (or fail to resolve) join the hidden set and leave the graph.

pub mod functions;
pub mod interpolate;
pub mod postfix;

use crate::error::Result;
use crate::types::{AttrValue, TfData, ERROR_PREFIX};
use interpolate::{has_symbol_refs, Interpolator};

/// Run the full evaluation stage on the pipeline state.
pub fn run(tfdata: &mut TfData) -> Result<()> {
    substitute_metadata(tfdata)?;
    resolve_counts(tfdata)?;
    hide_zero_count_nodes(tfdata);
    Ok(())
}

/// Rewrite metadata values that still reference symbols.
fn substitute_metadata(tfdata: &mut TfData) -> Result<()> {
    let interpolator = Interpolator::new(&tfdata.symbols);
    let resources: Vec<String> = tfdata.meta_data.keys().cloned().collect();

    for resource in resources {
        let module = tfdata.meta_data[&resource]
            .get("module")
            .and_then(AttrValue::as_str)
            .unwrap_or("main")
            .to_string();
        let keys: Vec<String> = tfdata.meta_data[&resource].keys().cloned().collect();
        for key in keys {
            let text = tfdata.meta_data[&resource][&key].to_string();
            if !has_symbol_refs(&text) {
                continue;
            }
            let substituted = interpolator.substitute(&text, &module)?;
            tfdata
                .meta_data
                .get_mut(&resource)
                .unwrap()
                .insert(key, AttrValue::Str(substituted));
        }
    }
    Ok(())
}

/// Strip interpolation padding from a count expression.
fn cleanup_curlies(text: &str) -> String {
    text.replace(['$', '{', '}'], " ").trim().to_string()
}

/// Find the conditional expression controlling how many copies of a
/// resource exist, if any.
fn conditional_expression(resource: &str, meta: &crate::types::Metadata) -> Option<String> {
    if let Some(for_each) = meta.get("for_each") {
        return Some(cleanup_curlies(&for_each.to_string()));
    }
    if let Some(count) = meta.get("count") {
        if count.as_int().is_none() && !resource.starts_with("null_resource") {
            return Some(cleanup_curlies(&count.to_string()));
        }
    }
    // for-comprehensions strip down to their collection expression.
    for value in meta.values() {
        let text = value.to_string();
        if text.trim_start().starts_with("[for ") {
            if let Some((_, rest)) = text.split_once(" in ") {
                let collection = rest.split(':').next().unwrap_or(rest);
                return Some(cleanup_curlies(collection));
            }
        }
    }
    None
}

/// Reduce one fully-substituted count expression to an integer.
fn evaluate_count(expression: &str) -> std::result::Result<i64, postfix::EvalError> {
    let resolved = functions::resolve_functions(expression);
    if resolved.contains(ERROR_PREFIX) {
        return Err(postfix::EvalError {
            expression: resolved,
            reason: "function evaluation failed".to_string(),
        });
    }
    // A for_each over a resolved collection counts its elements.
    let trimmed = resolved.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Some(value) = functions::parse_literal(trimmed) {
            match value {
                AttrValue::List(items) => return Ok(items.len() as i64),
                AttrValue::Map(map) => return Ok(map.len() as i64),
                _ => {}
            }
        }
    }
    postfix::evaluate(&resolved)
}

/// Resolve every non-integer count to an integer, marking failures.
fn resolve_counts(tfdata: &mut TfData) -> Result<()> {
    let interpolator = Interpolator::new(&tfdata.symbols);
    let resources: Vec<String> = tfdata.meta_data.keys().cloned().collect();

    for resource in resources {
        let meta = &tfdata.meta_data[&resource];
        let module = meta
            .get("module")
            .and_then(AttrValue::as_str)
            .unwrap_or("main")
            .to_string();
        let Some(expression) = conditional_expression(&resource, meta) else {
            continue;
        };

        let substituted = interpolator.substitute(&expression, &module)?;
        match evaluate_count(&substituted) {
            Ok(value) => {
                tracing::debug!(
                    module = %module,
                    resource = %resource,
                    count = value,
                    expression = %substituted,
                    "resolved count"
                );
                tfdata
                    .meta_data
                    .get_mut(&resource)
                    .unwrap()
                    .insert("count".to_string(), AttrValue::Int(value.max(0)));
            }
            Err(error) => {
                tracing::warn!(
                    module = %module,
                    resource = %resource,
                    error = %error,
                    "count evaluation failed, hiding resource"
                );
                tfdata
                    .meta_data
                    .get_mut(&resource)
                    .unwrap()
                    .insert("count".to_string(), AttrValue::Int(0));
            }
        }
    }
    Ok(())
}

/// Move zero-count and sentinel-count nodes into the hidden set and out
/// of the graph. Metadata is retained so later lookups never miss.
fn hide_zero_count_nodes(tfdata: &mut TfData) {
    let hidden: Vec<String> = tfdata
        .meta_data
        .iter()
        .filter(|(_, meta)| match meta.get("count") {
            Some(AttrValue::Int(0)) => true,
            Some(value) => value.is_sentinel(),
            None => false,
        })
        .map(|(k, _)| k.clone())
        .collect();

    for node in hidden {
        tfdata.graphdict.remove_node_and_refs(&node);
        tfdata.hidden.insert(node);
    }
}
