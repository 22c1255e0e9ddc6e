//! Cleanup and post-processing (pipeline stage C11).
//!
//! Final fixups before the graph leaves the pipeline:
//!
//! 1. Edges between siblings of the same group container get their
//!    direction settled by reverse-arrow priority.
//! 2. Cycles are broken by removing the edge that closes the shortest
//!    cycle; every removal is logged with the full cycle.
//! 3. The reachability closure is restored (every child becomes a key)
//!    and every node gains the required `name`/`type`/`provider`
//!    metadata.
//! 4. Adjacency lists are sorted, making the output a function of the
//!    input content alone.
//!
//! Running the pass a second time on its own output is a no-op.

use crate::error::TerracartaError;
use crate::graph::ids;
use crate::provider::ProviderContext;
use crate::types::{AttrValue, TfData};
use std::collections::BTreeSet;

/// Run the cleanup pass.
pub fn run(tfdata: &mut TfData, ctx: &ProviderContext) {
    apply_disconnect_list(tfdata, ctx);
    reverse_sibling_edges(tfdata, ctx);
    break_cycles(tfdata);
    restore_closure(tfdata);
    finalize_metadata(tfdata, ctx);
    tfdata.graphdict.sort_adjacency();
}

/// Strip every edge touching a type the provider wants disconnected.
fn apply_disconnect_list(tfdata: &mut TfData, ctx: &ProviderContext) {
    if ctx.disconnect_list.is_empty() {
        return;
    }
    for node in tfdata.graphdict.keys_snapshot() {
        let node_listed = ctx
            .disconnect_list
            .iter()
            .any(|t| ids::type_of(&node).starts_with(t));
        let children = tfdata.graphdict.children(&node).to_vec();
        for child in children {
            let child_listed = ctx
                .disconnect_list
                .iter()
                .any(|t| ids::type_of(&child).starts_with(t));
            if node_listed || child_listed {
                tfdata.graphdict.remove_edge(&node, &child);
            }
        }
    }
}

/// Settle edge direction between siblings of one group container: the
/// endpoint ranked earlier in the reverse-arrow table is the more outer
/// context and becomes the source.
fn reverse_sibling_edges(tfdata: &mut TfData, ctx: &ProviderContext) {
    let mut flips: Vec<(String, String)> = Vec::new();

    for group in tfdata.graphdict.keys_snapshot() {
        if !ctx.is_group_node(&group) {
            continue;
        }
        let siblings = tfdata.graphdict.children(&group).to_vec();
        for a in &siblings {
            for b in &siblings {
                if a == b || !tfdata.graphdict.has_edge(a, b) {
                    continue;
                }
                let rank_a = ctx.reverse_arrow_rank(ids::strip_module(a));
                let rank_b = ctx.reverse_arrow_rank(ids::strip_module(b));
                let flip = match (rank_a, rank_b) {
                    (Some(ra), Some(rb)) => rb < ra,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if flip && !tfdata.graphdict.has_edge(b, a) {
                    flips.push((a.clone(), b.clone()));
                }
            }
        }
    }

    for (a, b) in flips {
        tfdata.graphdict.remove_edge(&a, &b);
        tfdata.graphdict.add_edge(&b, &a);
        tracing::debug!(from = %a, to = %b, "sibling edge reversed");
    }
}

/// Collect every elementary cycle reachable by DFS.
fn find_cycles(tfdata: &TfData) -> Vec<Vec<String>> {
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();

    for start in tfdata.graphdict.nodes() {
        let mut stack: Vec<(String, Vec<String>)> =
            vec![(start.clone(), vec![start.clone()])];
        while let Some((node, path)) = stack.pop() {
            for child in tfdata.graphdict.children(&node) {
                if let Some(position) = path.iter().position(|p| p == child) {
                    let mut cycle = path[position..].to_vec();
                    cycle.push(child.clone());
                    // Canonical rotation dedupes the same loop found
                    // from different starting points.
                    let canonical = canonical_cycle(&cycle);
                    if seen.insert(canonical) {
                        cycles.push(cycle);
                    }
                } else if path.len() < tfdata.graphdict.len() {
                    let mut next = path.clone();
                    next.push(child.clone());
                    stack.push((child.clone(), next));
                }
            }
        }
    }
    cycles
}

fn canonical_cycle(cycle: &[String]) -> Vec<String> {
    let body = &cycle[..cycle.len() - 1];
    let min_index = body
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| v.as_str())
        .map_or(0, |(i, _)| i);
    let mut rotated: Vec<String> = body[min_index..].to_vec();
    rotated.extend_from_slice(&body[..min_index]);
    rotated
}

/// Remove the edge closing the shortest cycle until none remain.
fn break_cycles(tfdata: &mut TfData) {
    loop {
        let mut cycles = find_cycles(tfdata);
        if cycles.is_empty() {
            return;
        }
        // Deterministic pick: shortest cycle, lexicographic tie-break.
        cycles.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        let cycle = &cycles[0];
        let from = &cycle[cycle.len() - 2];
        let to = &cycle[cycle.len() - 1];
        tracing::warn!(
            cycle = %cycle.join(" -> "),
            removed = %format!("{from} -> {to}"),
            "removed circular reference"
        );
        tfdata.graphdict.remove_edge(from, to);
    }
}

/// Every identifier appearing in an adjacency list becomes a key.
fn restore_closure(tfdata: &mut TfData) {
    let mut missing: BTreeSet<String> = BTreeSet::new();
    for (_, children) in tfdata.graphdict.iter() {
        for child in children {
            if !tfdata.graphdict.contains(child) {
                missing.insert(child.clone());
            }
        }
    }
    for node in missing {
        tracing::debug!(node = %node, "adding missing leaf node");
        tfdata.graphdict.add_node(node);
    }
}

/// Guarantee `name`, `type`, and `provider` on every node's metadata.
fn finalize_metadata(tfdata: &mut TfData, ctx: &ProviderContext) {
    let provider = ctx.kind.as_str().to_string();
    for node in tfdata.graphdict.keys_snapshot() {
        let node_type = ids::type_of(&node).to_string();
        let node_name = ids::name_of(&node).to_string();
        let meta = tfdata.meta_data.entry(node.clone()).or_default();
        meta.entry("name".to_string())
            .or_insert_with(|| AttrValue::Str(node_name));
        meta.entry("type".to_string())
            .or_insert_with(|| AttrValue::Str(node_type));
        meta.entry("provider".to_string())
            .or_insert_with(|| AttrValue::Str(provider.clone()));
    }
}

/// Validation used by tests and the `validate` CLI subcommand. Returns
/// every invariant violation found rather than stopping at the first.
#[must_use]
pub fn validate(tfdata: &TfData, ctx: &ProviderContext) -> Vec<TerracartaError> {
    let mut problems = Vec::new();

    for (node, children) in tfdata.graphdict.iter() {
        if !tfdata.meta_data.contains_key(node) {
            problems.push(TerracartaError::MetadataInconsistency {
                message: "graph node has no metadata entry".to_string(),
                resource: Some(node.clone()),
            });
        } else {
            let meta = &tfdata.meta_data[node];
            for required in ["name", "type", "provider"] {
                if !meta.contains_key(required) {
                    problems.push(TerracartaError::MetadataInconsistency {
                        message: format!("metadata missing required key '{required}'"),
                        resource: Some(node.clone()),
                    });
                }
            }
        }
        for child in children {
            if !tfdata.graphdict.contains(child) {
                problems.push(TerracartaError::MetadataInconsistency {
                    message: format!("child '{child}' is not a graph node"),
                    resource: Some(node.clone()),
                });
            }
        }
    }

    for node in &tfdata.hidden {
        if tfdata.graphdict.contains(node) {
            problems.push(TerracartaError::MetadataInconsistency {
                message: "hidden node still present in graph".to_string(),
                resource: Some(node.clone()),
            });
        }
    }

    if !find_cycles(tfdata).is_empty() {
        problems.push(TerracartaError::MetadataInconsistency {
            message: "graph contains cycles after cleanup".to_string(),
            resource: None,
        });
    }

    // No concrete node may sit in two same-type group containers
    // without clone suffixes; that signals a missed expansion.
    for child in tfdata.graphdict.nodes() {
        if child.contains('~') || ctx.is_group_node(child) {
            continue;
        }
        let mut group_parents: Vec<String> = tfdata
            .graphdict
            .parents_of(child)
            .into_iter()
            .filter(|p| ctx.is_group_node(p))
            .collect();
        group_parents.sort();
        for pair in group_parents.windows(2) {
            if ids::type_of(&pair[0]) == ids::type_of(&pair[1])
                && ids::strip_suffix(&pair[0]) != ids::strip_suffix(&pair[1])
            {
                problems.push(TerracartaError::MetadataInconsistency {
                    message: format!(
                        "'{child}' is shared by sibling groups '{}' and '{}'",
                        pair[0], pair[1]
                    ),
                    resource: Some(child.clone()),
                });
            }
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider;
    use crate::types::Metadata;
    use pretty_assertions::assert_eq;

    fn tfdata_with(nodes: &[&str]) -> TfData {
        let mut tfdata = TfData::default();
        for node in nodes {
            tfdata.node_list.push((*node).to_string());
            tfdata.graphdict.add_node(*node);
            tfdata.meta_data.insert((*node).to_string(), Metadata::new());
        }
        tfdata
    }

    #[test]
    fn test_two_node_cycle_breaks_once() {
        let mut tfdata = tfdata_with(&["aws_instance.a", "aws_instance.b"]);
        tfdata.graphdict.add_edge("aws_instance.a", "aws_instance.b");
        tfdata.graphdict.add_edge("aws_instance.b", "aws_instance.a");

        run(&mut tfdata, &provider::aws::context());

        let forward = tfdata.graphdict.has_edge("aws_instance.a", "aws_instance.b");
        let backward = tfdata.graphdict.has_edge("aws_instance.b", "aws_instance.a");
        // Exactly one of the two edges survives.
        assert!(forward ^ backward);
    }

    #[test]
    fn test_cycle_breaking_is_deterministic() {
        let build = || {
            let mut tfdata = tfdata_with(&["aws_instance.a", "aws_instance.b"]);
            tfdata.graphdict.add_edge("aws_instance.a", "aws_instance.b");
            tfdata.graphdict.add_edge("aws_instance.b", "aws_instance.a");
            tfdata
        };
        let ctx = provider::aws::context();
        let mut one = build();
        let mut two = build();
        run(&mut one, &ctx);
        run(&mut two, &ctx);
        assert_eq!(one.graphdict, two.graphdict);
    }

    #[test]
    fn test_missing_children_become_keys() {
        let mut tfdata = tfdata_with(&["aws_vpc.main"]);
        tfdata.graphdict.add_edge("aws_vpc.main", "aws_subnet.ghost");

        run(&mut tfdata, &provider::aws::context());

        assert!(tfdata.graphdict.contains("aws_subnet.ghost"));
    }

    #[test]
    fn test_metadata_finalized_with_required_keys() {
        let mut tfdata = tfdata_with(&["aws_vpc.main"]);
        run(&mut tfdata, &provider::aws::context());

        let meta = &tfdata.meta_data["aws_vpc.main"];
        assert_eq!(meta["name"].as_str(), Some("main"));
        assert_eq!(meta["type"].as_str(), Some("aws_vpc"));
        assert_eq!(meta["provider"].as_str(), Some("aws"));
    }

    #[test]
    fn test_adjacency_sorted() {
        let mut tfdata = tfdata_with(&["aws_vpc.main", "aws_subnet.b", "aws_subnet.a"]);
        tfdata.graphdict.add_edge("aws_vpc.main", "aws_subnet.b");
        tfdata.graphdict.add_edge("aws_vpc.main", "aws_subnet.a");

        run(&mut tfdata, &provider::aws::context());

        assert_eq!(
            tfdata.graphdict.children("aws_vpc.main"),
            ["aws_subnet.a", "aws_subnet.b"]
        );
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut tfdata = tfdata_with(&["aws_vpc.main", "aws_subnet.a", "aws_instance.web"]);
        tfdata.graphdict.add_edge("aws_vpc.main", "aws_subnet.a");
        tfdata.graphdict.add_edge("aws_subnet.a", "aws_instance.web");
        tfdata.graphdict.add_edge("aws_instance.web", "aws_vpc.main");

        let ctx = provider::aws::context();
        run(&mut tfdata, &ctx);
        let graph = tfdata.graphdict.clone();
        let meta = tfdata.meta_data.clone();
        run(&mut tfdata, &ctx);

        assert_eq!(tfdata.graphdict, graph);
        assert_eq!(tfdata.meta_data, meta);
    }

    #[test]
    fn test_validate_clean_graph_is_empty() {
        let mut tfdata = tfdata_with(&["aws_vpc.main", "aws_subnet.a"]);
        tfdata.graphdict.add_edge("aws_vpc.main", "aws_subnet.a");
        let ctx = provider::aws::context();
        run(&mut tfdata, &ctx);
        assert!(validate(&tfdata, &ctx).is_empty());
    }

    #[test]
    fn test_validate_reports_shared_concrete_child() {
        let mut tfdata = tfdata_with(&[
            "aws_subnet.a",
            "aws_subnet.b",
            "aws_instance.web",
        ]);
        tfdata.graphdict.add_edge("aws_subnet.a", "aws_instance.web");
        tfdata.graphdict.add_edge("aws_subnet.b", "aws_instance.web");
        let ctx = provider::aws::context();
        run(&mut tfdata, &ctx);
        let problems = validate(&tfdata, &ctx);
        assert!(problems.iter().any(|p| matches!(
            p,
            TerracartaError::MetadataInconsistency { resource: Some(r), .. }
                if r == "aws_instance.web"
        )));
    }

    #[test]
    fn test_validate_reports_dangling_child() {
        let mut tfdata = tfdata_with(&["aws_vpc.main"]);
        tfdata.graphdict.add_edge("aws_vpc.main", "aws_subnet.ghost");
        let ctx = provider::aws::context();
        // No cleanup run: the dangling child should be reported.
        let problems = validate(&tfdata, &ctx);
        assert!(!problems.is_empty());
    }
}
