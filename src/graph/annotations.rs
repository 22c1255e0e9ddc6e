//! Automatic and user annotations (pipeline stage C7).
//!
//! Automatic annotations attach synthetic context nodes (users,
//! internet, on-prem) to resources matching the provider's rules. User
//! annotations then apply the YAML override sections: `add`, `connect`,
//! `disconnect`, `remove`, `update`. Wildcard sources (`prefix*`) apply
//! to every node starting with the prefix.

use crate::graph::ids;
use crate::provider::context::Arrow;
use crate::provider::ProviderContext;
use crate::types::{AttrValue, TfData};

/// Run automatic annotations, then user overrides.
pub fn run(tfdata: &mut TfData, ctx: &ProviderContext) {
    auto_annotate(tfdata, ctx);
    if !tfdata.annotations.is_empty() {
        apply_user_annotations(tfdata, ctx);
    }
}

fn auto_annotate(tfdata: &mut TfData, ctx: &ProviderContext) {
    for node in tfdata.graphdict.keys_snapshot() {
        for rule in &ctx.auto_annotations {
            if !ids::strip_module(&node).starts_with(rule.prefix) {
                continue;
            }
            for link in rule.links {
                let target = resolve_link_target(tfdata, link);
                if target == node {
                    continue;
                }
                tfdata.graphdict.add_node(target.clone());
                tfdata.meta_data.entry(target.clone()).or_default();

                match rule.arrow {
                    Arrow::Forward => {
                        tfdata.graphdict.add_edge(&node, &target);
                        // Deletions make room for the preferred edge
                        // (e.g. the internet gateway displaces the NAT
                        // gateway as the default internet connection).
                        for prefix in rule.delete {
                            let stale: Vec<String> = tfdata
                                .graphdict
                                .children(&node)
                                .iter()
                                .filter(|c| ids::strip_module(c).starts_with(prefix))
                                .cloned()
                                .collect();
                            for child in stale {
                                tfdata.graphdict.remove_edge(&node, &child);
                            }
                        }
                    }
                    Arrow::Reverse => {
                        tfdata.graphdict.add_edge(&target, &node);
                    }
                }
                tracing::debug!(node = %node, target = %target, "auto annotation");
            }
        }
    }
}

/// A link spec ending in `.*` binds to any existing node of that type,
/// else to a synthetic `<type>.this`.
fn resolve_link_target(tfdata: &TfData, link: &str) -> String {
    if let Some(type_prefix) = link.strip_suffix(".*") {
        return tfdata
            .graphdict
            .nodes()
            .find(|n| ids::strip_module(n).starts_with(type_prefix))
            .cloned()
            .unwrap_or_else(|| format!("{type_prefix}.this"));
    }
    link.to_string()
}

fn matching_nodes(tfdata: &TfData, pattern: &str) -> Vec<String> {
    if let Some(prefix) = pattern.strip_suffix('*') {
        tfdata
            .graphdict
            .nodes()
            .filter(|n| ids::strip_module(n).starts_with(prefix))
            .cloned()
            .collect()
    } else {
        vec![pattern.to_string()]
    }
}

fn apply_user_annotations(tfdata: &mut TfData, ctx: &ProviderContext) {
    tracing::info!("applying user annotation overrides");
    let annotations = tfdata.annotations.clone();

    for (node, meta) in &annotations.add {
        tracing::debug!(node = %node, "+ user node");
        tfdata.graphdict.add_node(node.clone());
        tfdata.meta_data.insert(node.clone(), meta.clone());
    }

    for (source, targets) in &annotations.connect {
        for target in targets {
            let destination = target.destination().to_string();
            for node in matching_nodes(tfdata, source) {
                tracing::debug!(source = %node, dest = %destination, "user connect");
                tfdata.graphdict.add_edge(&node, &destination);
                tfdata.graphdict.add_node(destination.clone());
                if let Some(label) = target.label() {
                    tfdata
                        .meta_data
                        .entry(node.clone())
                        .or_default()
                        .insert("edge_labels".to_string(), AttrValue::from(label));
                }
            }
        }
    }

    for (source, targets) in &annotations.disconnect {
        for target in targets {
            for node in matching_nodes(tfdata, source) {
                tracing::debug!(source = %node, dest = %target, "user disconnect");
                tfdata.graphdict.remove_edge(&node, target);
            }
        }
    }

    for pattern in &annotations.remove {
        let mut targets = matching_nodes(tfdata, pattern);
        // Consolidation ran first; a name the user knew from the source
        // may have collapsed into its canonical node by now.
        targets.retain(|node| tfdata.graphdict.contains(node));
        if targets.is_empty() {
            if let Some(rule) = ctx.consolidated_for(pattern) {
                if tfdata.graphdict.contains(rule.resource_name) {
                    targets.push(rule.resource_name.to_string());
                }
            }
        }
        for node in targets {
            tracing::debug!(node = %node, "- user node");
            tfdata.graphdict.remove_node_and_refs(&node);
            tfdata.meta_data.remove(&node);
            tfdata.hidden.remove(&node);
        }
    }

    for (pattern, updates) in &annotations.update {
        for node in matching_nodes(tfdata, pattern) {
            let meta = tfdata.meta_data.entry(node).or_default();
            for (key, value) in updates {
                meta.insert(key.clone(), value.clone());
            }
        }
    }
}
