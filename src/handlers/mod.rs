//! Per-resource-type transformation handlers (pipeline stage C9).
//!
//! The provider context maps resource-type patterns to handlers. A
//! handler is a list of *declarative ops* from a fixed vocabulary
//! ([`Op`]), an *imperative function* for cases the vocabulary cannot
//! express, or both. Ops run strictly sequentially per handler;
//! `HandlerOrder::Before` runs the imperative part first (used to seed
//! metadata an op needs).
//!
//! Cross-handler ordering issues are solved by reading from
//! `original_graphdict` (the pristine C4 snapshot) instead of the
//! mid-mutation state.

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod transforms;

use crate::error::Result;
use crate::graph::ids;
use crate::provider::ProviderContext;
use crate::types::{Metadata, TfData};

/// An imperative handler function.
pub type HandlerFn = fn(&mut TfData, &ProviderContext) -> Result<()>;

/// A synthetic-node name generator, resolved by name from the provider's
/// function registry (e.g. `generate_az_node_name`).
pub type GeneratorFn = fn(&str, &Metadata) -> String;

/// When the imperative part of a handler runs relative to its ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerOrder {
    /// Imperative code runs before the declarative ops.
    Before,
    /// Imperative code runs after the declarative ops (the default).
    #[default]
    After,
}

/// One transformation op from the fixed vocabulary. Pattern arguments
/// are substring matches on node identifiers.
#[derive(Debug, Clone)]
pub enum Op {
    /// Clone a resource into `name~1..name~N`, one per referenced subnet,
    /// placing each clone inside the matching subnet.
    ExpandToNumberedInstances {
        /// Resources to expand
        resource_pattern: String,
        /// Metadata key holding the subnet references
        subnet_key: String,
        /// Skip resources already carrying a `~` suffix
        skip_if_numbered: bool,
    },

    /// Insert a synthetic node between matching parent/child edges:
    /// `parent -> child` becomes `parent -> intermediate -> child`.
    InsertIntermediateNode {
        /// Parents to match
        parent_pattern: String,
        /// Children to match
        child_pattern: String,
        /// Name of the generator in the provider's function registry
        generator: &'static str,
        /// Create the intermediate node when absent
        create_if_missing: bool,
    },

    /// Move matching resources from one kind of parent to another.
    MoveToParent {
        /// Resources to move
        resource_pattern: String,
        /// Parents to take them from
        from_parent_pattern: String,
        /// Parent to give them to
        to_parent_pattern: String,
    },

    /// Delete matching nodes outright.
    DeleteNodes {
        /// Resources to delete
        resource_pattern: String,
        /// Also clean up references from parents
        remove_from_parents: bool,
    },

    /// Collect the provider's shared services into one container node.
    GroupSharedServices {
        /// Identifier of the group node, e.g. `aws_group.shared_services`
        group_name: String,
    },

    /// If `X -> A` and `B -> X`, add `A -> B` (flattens intermediary hubs).
    LinkViaSharedChild {
        /// Pattern for `A`
        source_pattern: String,
        /// Pattern for `B`
        target_pattern: String,
        /// Remove the intermediary edges afterwards
        remove_intermediate: bool,
    },

    /// If `M -> A` and `M -> B`, add `A -> B` and delete `M` (event
    /// source mappings and similar configuration-only resources).
    LinkPeersViaIntermediary {
        /// Pattern for `M`
        intermediary_pattern: String,
        /// Pattern for `A`
        source_pattern: String,
        /// Pattern for `B`
        target_pattern: String,
    },

    /// Add `source -> target` for every matching pair, optionally
    /// removing the reverse edge.
    BidirectionalLink {
        /// Pattern for sources
        source_pattern: String,
        /// Pattern for targets
        target_pattern: String,
        /// Drop `target -> source` edges after linking
        cleanup_reverse: bool,
    },

    /// Config-driven variant swap (same semantics as the C8 pass).
    ApplyResourceVariants {
        /// Resources to inspect
        resource_pattern: String,
        /// Metadata key to scan for keywords
        metadata_key: String,
        /// `(keyword, replacement type)` pairs
        variants: Vec<(String, String)>,
    },
}

/// A resource-type pattern bound to its transformation pipeline.
#[derive(Debug, Clone)]
pub struct HandlerSpec {
    /// Substring matched against resource type prefixes.
    pub pattern: &'static str,
    /// Declarative ops, applied in order.
    pub ops: Vec<Op>,
    /// Imperative part, when the vocabulary is not enough.
    pub imperative: Option<HandlerFn>,
    /// Whether the imperative part runs before or after the ops.
    pub order: HandlerOrder,
}

impl HandlerSpec {
    /// A purely declarative handler.
    #[must_use]
    pub fn ops(pattern: &'static str, ops: Vec<Op>) -> Self {
        Self { pattern, ops, imperative: None, order: HandlerOrder::After }
    }

    /// A purely imperative handler.
    #[must_use]
    pub fn imperative(pattern: &'static str, handler: HandlerFn) -> Self {
        Self { pattern, ops: Vec::new(), imperative: Some(handler), order: HandlerOrder::After }
    }

    /// An imperative handler that must run before its ops.
    #[must_use]
    pub fn before(pattern: &'static str, handler: HandlerFn, ops: Vec<Op>) -> Self {
        Self { pattern, ops, imperative: Some(handler), order: HandlerOrder::Before }
    }
}

/// Run every handler whose pattern matches a resource type present in
/// the node list.
pub fn run(tfdata: &mut TfData, ctx: &ProviderContext) -> Result<()> {
    let resource_types: Vec<String> = tfdata
        .node_list
        .iter()
        .map(|node| ids::type_of(node).to_string())
        .collect();

    for spec in &ctx.special_resources {
        let matched = resource_types.iter().any(|t| t.contains(spec.pattern));
        if !matched {
            continue;
        }
        tracing::debug!(pattern = spec.pattern, "running resource handler");

        if spec.order == HandlerOrder::Before {
            if let Some(handler) = spec.imperative {
                handler(tfdata, ctx)?;
            }
        }
        for op in &spec.ops {
            transforms::apply(tfdata, ctx, op)?;
        }
        if spec.order == HandlerOrder::After {
            if let Some(handler) = spec.imperative {
                handler(tfdata, ctx)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider;

    #[test]
    fn test_handlers_skip_unmatched_patterns() {
        let ctx = provider::aws::context();
        let mut tfdata = TfData::default();
        tfdata.node_list.push("aws_s3_bucket.data".to_string());
        tfdata.graphdict.add_node("aws_s3_bucket.data");
        tfdata
            .meta_data
            .insert("aws_s3_bucket.data".to_string(), Metadata::new());

        // No subnet/LB/EKS handlers should fire; the graph is unchanged
        // apart from the shared-services group the catch-all creates.
        run(&mut tfdata, &ctx).unwrap();
        assert!(tfdata.graphdict.contains("aws_s3_bucket.data"));
    }
}
