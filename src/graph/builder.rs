//! Base graph construction (pipeline stage C4).
//!
//! Reads the planner's low-level dependency edges and produces the
//! first-draft adjacency map. Edge direction honors the provider's
//! reverse-arrow rules so containers point at their contents from the
//! start. An implicit rule adds network -> subnet containment edges by
//! CIDR inclusion (address space inclusion on Azure, network reference
//! on GCP).
//!
//! Two immutable snapshots are taken at the end: `original_graphdict`
//! and `original_metadata`. Later passes consult them whenever mutation
//! order would otherwise mask the pristine relationships.

use crate::error::Result;
use crate::graph::ids;
use crate::loader::plan::PlanGraph;
use crate::provider::{ProviderContext, ProviderKind};
use crate::types::TfData;
use ipnet::IpNet;

/// Build the base graph from the planner's low-level edges.
pub fn build(tfdata: &mut TfData, plan_graph: &PlanGraph, ctx: &ProviderContext) -> Result<()> {
    for node in &tfdata.node_list {
        tfdata.graphdict.add_node(node.clone());
    }

    // gvid -> module-stripped address table.
    let gvid_table: Vec<String> = plan_graph
        .objects
        .iter()
        .map(|object| {
            object
                .label
                .as_deref()
                .map(ids::strip_module)
                .unwrap_or_default()
                .to_string()
        })
        .collect();

    // Planner labels are unsuffixed; an edge endpoint may stand for
    // several `~k` clones created from count-expanded entries.
    let resolve = |graph: &crate::graph::Graph, label: &str| -> Vec<String> {
        if label.is_empty() {
            return Vec::new();
        }
        graph
            .nodes()
            .filter(|node| *node == label || ids::strip_suffix(node) == label)
            .cloned()
            .collect()
    };

    for edge in &plan_graph.edges {
        let Some(head_label) = gvid_table.get(edge.head) else {
            continue;
        };
        let Some(tail_label) = gvid_table.get(edge.tail) else {
            continue;
        };
        let heads = resolve(&tfdata.graphdict, head_label);
        let tails = resolve(&tfdata.graphdict, tail_label);
        if heads.is_empty() || tails.is_empty() {
            continue;
        }

        // A tail in the reverse-arrow table is a container, and the
        // forced tables pin resources to one end of an arrow; either
        // flips the edge to tail -> head.
        let head_type = ids::type_of(head_label);
        let tail_type = ids::type_of(tail_label);
        let flipped = ctx.reverse_arrow_rank(tail_label).is_some()
            || ctx.forced_dest.iter().any(|t| head_type.starts_with(t))
            || ctx.forced_origin.iter().any(|t| tail_type.starts_with(t));
        for head in &heads {
            for tail in &tails {
                if head == tail {
                    continue;
                }
                if flipped {
                    tfdata.graphdict.add_edge(tail, head);
                    tracing::debug!(parent = %tail, child = %head, "base edge (reversed)");
                } else {
                    tfdata.graphdict.add_edge(head, tail);
                    tracing::debug!(parent = %head, child = %tail, "base edge");
                }
            }
        }
    }

    add_network_containment(tfdata, ctx);

    tfdata.original_graphdict = tfdata.graphdict.clone();
    tfdata.original_metadata = tfdata.meta_data.clone();

    tracing::info!(
        nodes = tfdata.graphdict.len(),
        "base graph built"
    );
    Ok(())
}

fn cidr_of(tfdata: &TfData, node: &str, key: &str) -> Vec<IpNet> {
    let Some(value) = tfdata.metadata_of(node).and_then(|m| m.get(key)) else {
        return Vec::new();
    };
    let mut leaves = Vec::new();
    value.string_leaves(&mut leaves);
    leaves
        .iter()
        .filter_map(|leaf| leaf.trim().parse::<IpNet>().ok())
        .collect()
}

/// Containment implied by addressing rather than by planner edges.
fn add_network_containment(tfdata: &mut TfData, ctx: &ProviderContext) {
    let networks = tfdata.graphdict.keys_containing(ctx.network_type());
    let subnets = tfdata.graphdict.keys_containing(ctx.subnet_type());

    let (network_key, subnet_key) = match ctx.kind {
        ProviderKind::Aws => ("cidr_block", "cidr_block"),
        ProviderKind::Azure => ("address_space", "address_prefixes"),
        ProviderKind::Gcp => ("", ""),
    };

    if ctx.kind == ProviderKind::Gcp {
        // GCP subnetworks name their network instead of nesting CIDRs.
        for network in &networks {
            let network_ref = ids::strip_module(network);
            for subnet in &subnets {
                let references = tfdata
                    .metadata_of(subnet)
                    .and_then(|m| m.get("network"))
                    .map(|v| v.to_string())
                    .is_some_and(|v| {
                        v.contains(network_ref) || v.contains(ids::name_of(network))
                    });
                if references {
                    tfdata.graphdict.add_edge(network, subnet);
                }
            }
        }
        return;
    }

    for network in &networks {
        let network_nets = cidr_of(tfdata, network, network_key);
        if network_nets.is_empty() {
            continue;
        }
        for subnet in &subnets {
            let subnet_nets = cidr_of(tfdata, subnet, subnet_key);
            let contained = subnet_nets.iter().any(|sn| {
                network_nets.iter().any(|nn| nn.contains(sn))
            });
            if contained {
                tfdata.graphdict.add_edge(network, subnet);
                tracing::debug!(network = %network, subnet = %subnet, "containment by address");
            }
        }
    }
}
