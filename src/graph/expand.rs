//! Multi-instance expansion (pipeline stage C10).
//!
//! Every node with an integer `count` of 2 or more becomes numbered
//! clones `id~1..id~count`. Clones inherit numbered versions of their
//! connections when the child is itself being cloned (or sits under a
//! counted parent), and plain copies otherwise. Parents of the original
//! swap their edge for one edge per clone. The original disappears.
//!
//! Security groups get one extra rule: an un-counted security group
//! whose parent carries a count is cloned alongside it, because every
//! replicated subnet needs its own visual container.

use crate::graph::ids;
use crate::provider::{ProviderContext, ProviderKind};
use crate::types::TfData;
use std::collections::{BTreeMap, BTreeSet};

/// Run the expansion pass.
pub fn run(tfdata: &mut TfData, ctx: &ProviderContext) {
    let multi = collect_expandable(tfdata, ctx);
    if multi.is_empty() {
        return;
    }
    tracing::debug!(count = multi.len(), "expanding counted resources");

    let mut cloned_children: BTreeSet<String> = BTreeSet::new();

    for (resource, count) in &multi {
        let children = tfdata.graphdict.children(resource).to_vec();

        for i in 1..=*count {
            let clone = ids::with_suffix(resource, i as u32);
            let clone_children: Vec<String> = children
                .iter()
                .map(|child| {
                    if numbered_connection(tfdata, ctx, &multi, child) {
                        ids::with_suffix(child, i as u32)
                    } else {
                        child.clone()
                    }
                })
                .collect();
            tfdata.graphdict.insert(clone.clone(), clone_children);
            if let Some(meta) = tfdata.meta_data.get(resource).cloned() {
                tfdata.meta_data.insert(clone, meta);
            }
        }

        // Numbered children need real nodes of their own.
        for child in &children {
            if !numbered_connection(tfdata, ctx, &multi, child) || multi.contains_key(child) {
                continue;
            }
            for i in 1..=*count {
                let numbered = ids::with_suffix(child, i as u32);
                if !tfdata.graphdict.contains(&numbered) {
                    let grandchildren = tfdata.graphdict.children(child).to_vec();
                    tfdata.graphdict.insert(numbered.clone(), grandchildren);
                    if let Some(meta) = tfdata.meta_data.get(child).cloned() {
                        tfdata.meta_data.insert(numbered, meta);
                    }
                }
            }
            cloned_children.insert(child.clone());
        }

        // Rewire parents to the clones.
        for parent in tfdata.graphdict.parents_of(resource) {
            if multi.contains_key(ids::strip_suffix(&parent)) && !parent.contains('~') {
                // The counted parent disappears below; its own clones
                // already carry numbered references.
                continue;
            }
            tfdata.graphdict.remove_edge(&parent, resource);
            match ids::suffix_of(&parent) {
                // A numbered parent only keeps its own replica.
                Some(suffix) if suffix as i64 <= *count => {
                    tfdata
                        .graphdict
                        .add_edge(&parent, &ids::with_suffix(resource, suffix));
                }
                Some(_) => {}
                None => {
                    for i in 1..=*count {
                        tfdata
                            .graphdict
                            .add_edge(&parent, &ids::with_suffix(resource, i as u32));
                    }
                }
            }
        }

        tfdata.graphdict.remove_node(resource);
        tfdata.meta_data.remove(resource);
        tracing::debug!(resource = %resource, count = count, "expanded");
    }

    // Originals of numbered children are replaced by their clones.
    for child in cloned_children {
        tfdata.graphdict.remove_node(&child);
        for parent in tfdata.graphdict.keys_snapshot() {
            tfdata.graphdict.remove_edge(&parent, &child);
        }
        tfdata.meta_data.remove(&child);
    }
}

/// Nodes eligible for expansion: integer count >= 2, not already
/// numbered, not a shared service, not a specially-handled type,
/// plus the security-group rule.
fn collect_expandable(tfdata: &TfData, ctx: &ProviderContext) -> BTreeMap<String, i64> {
    let mut multi: BTreeMap<String, i64> = BTreeMap::new();

    for node in tfdata.graphdict.nodes() {
        if node.contains('~') || ctx.is_shared_service(node) || ctx.is_special_exact(node) {
            continue;
        }
        let Some(count) = tfdata.count_of(node) else {
            continue;
        };
        if count >= 2 {
            multi.insert(node.clone(), count);
        }
    }

    let sg_type = security_group_type(ctx);
    for node in tfdata.graphdict.nodes() {
        if !ids::strip_module(node).starts_with(sg_type) || node.contains('~') {
            continue;
        }
        if multi.contains_key(node) {
            continue;
        }
        let parent_count = tfdata
            .graphdict
            .parents_of(node)
            .iter()
            .filter_map(|p| tfdata.count_of(p))
            .max();
        if let Some(count) = parent_count {
            if count >= 2 {
                multi.insert(node.clone(), count);
            }
        }
    }

    multi
}

fn security_group_type(ctx: &ProviderContext) -> &'static str {
    match ctx.kind {
        ProviderKind::Aws => "aws_security_group.",
        ProviderKind::Azure => "azurerm_network_security_group.",
        ProviderKind::Gcp => "google_compute_firewall.",
    }
}

/// Whether a clone's reference to `child` should carry the clone's
/// number: the child is being cloned itself, or it carries a count of
/// its own while sitting under a counted parent. A plain uncounted
/// dependency stays shared across every clone.
fn numbered_connection(
    tfdata: &TfData,
    ctx: &ProviderContext,
    multi: &BTreeMap<String, i64>,
    child: &str,
) -> bool {
    if child.contains('~') || ctx.is_shared_service(child) {
        return false;
    }
    if multi.contains_key(child) {
        return true;
    }
    let child_counted = tfdata.count_of(child).is_some_and(|c| c >= 1);
    if !child_counted {
        return false;
    }
    tfdata
        .graphdict
        .parents_of(child)
        .iter()
        .any(|parent| {
            parent.contains('~')
                || tfdata.count_of(parent).is_some_and(|c| c >= 2)
        })
}
