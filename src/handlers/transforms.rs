//! Declarative transformation ops.
//!
//! Reusable building blocks for mutating the graph, composed by the
//! per-provider handler tables. Every op takes the pipeline state and
//! pattern arguments; patterns are substring matches on identifiers.

use crate::error::{Result, TerracartaError};
use crate::graph::ids;
use crate::provider::ProviderContext;
use crate::types::{AttrValue, TfData};
use super::Op;

/// Apply one op to the pipeline state.
pub fn apply(tfdata: &mut TfData, ctx: &ProviderContext, op: &Op) -> Result<()> {
    match op {
        Op::ExpandToNumberedInstances { resource_pattern, subnet_key, skip_if_numbered } => {
            expand_to_numbered_instances(tfdata, ctx, resource_pattern, subnet_key, *skip_if_numbered);
            Ok(())
        }
        Op::InsertIntermediateNode { parent_pattern, child_pattern, generator, create_if_missing } => {
            insert_intermediate_node(tfdata, ctx, parent_pattern, child_pattern, generator, *create_if_missing)
        }
        Op::MoveToParent { resource_pattern, from_parent_pattern, to_parent_pattern } => {
            move_to_parent(tfdata, resource_pattern, from_parent_pattern, to_parent_pattern);
            Ok(())
        }
        Op::DeleteNodes { resource_pattern, remove_from_parents } => {
            delete_nodes(tfdata, resource_pattern, *remove_from_parents);
            Ok(())
        }
        Op::GroupSharedServices { group_name } => {
            group_shared_services(tfdata, ctx, group_name);
            Ok(())
        }
        Op::LinkViaSharedChild { source_pattern, target_pattern, remove_intermediate } => {
            link_via_shared_child(tfdata, ctx, source_pattern, target_pattern, *remove_intermediate);
            Ok(())
        }
        Op::LinkPeersViaIntermediary { intermediary_pattern, source_pattern, target_pattern } => {
            link_peers_via_intermediary(tfdata, intermediary_pattern, source_pattern, target_pattern);
            Ok(())
        }
        Op::BidirectionalLink { source_pattern, target_pattern, cleanup_reverse } => {
            bidirectional_link(tfdata, source_pattern, target_pattern, *cleanup_reverse);
            Ok(())
        }
        Op::ApplyResourceVariants { resource_pattern, metadata_key, variants } => {
            apply_resource_variants(tfdata, resource_pattern, metadata_key, variants);
            Ok(())
        }
    }
}

/// The subnets a resource references through one of its attributes.
///
/// The attribute may hold subnet ids (matched against each subnet's `id`
/// metadata) or interpolation strings naming the subnet resource.
pub fn referenced_subnets(tfdata: &TfData, ctx: &ProviderContext, resource: &str, key: &str) -> Vec<String> {
    let subnets = tfdata.graphdict.keys_containing(ctx.subnet_type());
    let Some(meta) = tfdata.metadata_of(resource) else {
        return Vec::new();
    };
    // Consult the pristine metadata too: handlers may already have
    // rewritten the live value by the time expansion runs.
    let value = meta.get(key).or_else(|| {
        tfdata
            .original_metadata
            .get(ids::strip_suffix(resource))
            .and_then(|m| m.get(key))
    });
    let Some(value) = value else {
        return Vec::new();
    };

    let mut leaves = Vec::new();
    value.string_leaves(&mut leaves);
    let text = leaves.join(" ");

    let mut matched: Vec<String> = subnets
        .into_iter()
        .filter(|subnet| {
            let stripped = ids::strip_module(subnet);
            if text.contains(ids::strip_suffix(stripped)) {
                return true;
            }
            tfdata
                .metadata_of(subnet)
                .and_then(|m| m.get("id"))
                .and_then(AttrValue::as_str)
                .is_some_and(|id| !id.is_empty() && text.contains(id))
        })
        .collect();
    matched.sort();
    matched.dedup();
    matched
}

/// Expand a resource into `name~1..name~N`, one per referenced subnet.
pub fn expand_to_numbered_instances(
    tfdata: &mut TfData,
    ctx: &ProviderContext,
    resource_pattern: &str,
    subnet_key: &str,
    skip_if_numbered: bool,
) {
    let resources = tfdata.graphdict.keys_containing(resource_pattern);

    for resource in resources {
        if skip_if_numbered && resource.contains('~') {
            continue;
        }
        let matching = referenced_subnets(tfdata, ctx, &resource, subnet_key);

        if matching.len() > 1 {
            for (i, subnet) in matching.iter().enumerate() {
                let numbered = ids::with_suffix(&resource, (i + 1) as u32);
                let children = tfdata.graphdict.children(&resource).to_vec();
                tfdata.graphdict.insert(numbered.clone(), children);
                if let Some(meta) = tfdata.meta_data.get(&resource).cloned() {
                    tfdata.meta_data.insert(numbered.clone(), meta);
                }
                tfdata.graphdict.add_edge(subnet, &numbered);
                tfdata.graphdict.remove_edge(subnet, &resource);
            }
            tfdata.graphdict.remove_node(&resource);
            tfdata.meta_data.remove(&resource);
            tracing::debug!(resource = %resource, clones = matching.len(), "expanded resource across subnets");
        } else if matching.len() == 1 {
            tfdata.graphdict.add_edge(&matching[0], &resource);
        }
    }

    // Keep clone k only inside the k-th subnet so replicas never overlap.
    let mut subnets = tfdata.graphdict.keys_containing(ctx.subnet_type());
    subnets.sort();
    for (idx, subnet) in subnets.iter().enumerate() {
        let expected = (idx + 1) as u32;
        let stale: Vec<String> = tfdata
            .graphdict
            .children(subnet)
            .iter()
            .filter(|child| {
                child.contains(resource_pattern)
                    && ids::suffix_of(child).is_some_and(|suffix| suffix != expected)
            })
            .cloned()
            .collect();
        for child in stale {
            tfdata.graphdict.remove_edge(subnet, &child);
        }
    }
}

/// Insert generated intermediate nodes between matching parent/child
/// edges: `parent -> child` becomes `parent -> intermediate -> child`.
pub fn insert_intermediate_node(
    tfdata: &mut TfData,
    ctx: &ProviderContext,
    parent_pattern: &str,
    child_pattern: &str,
    generator_name: &str,
    create_if_missing: bool,
) -> Result<()> {
    let generator = ctx.generator(generator_name).ok_or_else(|| {
        TerracartaError::internal(format!(
            "unknown intermediate-node generator '{generator_name}'"
        ))
    })?;

    let parents = tfdata.graphdict.keys_containing(parent_pattern);
    let children = tfdata.graphdict.keys_containing(child_pattern);

    for child in &children {
        let child_meta = tfdata.metadata_of(child).cloned().unwrap_or_default();
        let intermediate = generator(child, &child_meta);

        if create_if_missing && !tfdata.graphdict.contains(&intermediate) {
            tfdata.graphdict.add_node(intermediate.clone());
            // Clones of the intermediate are driven by its children, not
            // by inherited count attributes.
            let mut meta = child_meta.clone();
            for attr in ["count", "desired_count", "max_capacity", "for_each"] {
                meta.remove(attr);
            }
            tfdata.meta_data.insert(intermediate.clone(), meta);
        }

        for parent in &parents {
            if tfdata.graphdict.has_edge(parent, child) {
                tfdata.graphdict.remove_edge(parent, child);
                tfdata.graphdict.add_edge(parent, &intermediate);
            }
        }
        tfdata.graphdict.add_edge(&intermediate, child);
    }
    Ok(())
}

/// Move matching resources from one kind of parent to another.
pub fn move_to_parent(
    tfdata: &mut TfData,
    resource_pattern: &str,
    from_parent_pattern: &str,
    to_parent_pattern: &str,
) {
    let resources = tfdata.graphdict.keys_containing(resource_pattern);
    let from_parents = tfdata.graphdict.keys_containing(from_parent_pattern);
    let to_parents = tfdata.graphdict.keys_containing(to_parent_pattern);
    let Some(to_parent) = to_parents.first().cloned() else {
        return;
    };

    for resource in &resources {
        for from_parent in &from_parents {
            if tfdata.graphdict.remove_edge(from_parent, resource) {
                tfdata.graphdict.add_edge(&to_parent, resource);
            }
        }
    }
}

/// Delete matching nodes, optionally cleaning parent adjacencies.
pub fn delete_nodes(tfdata: &mut TfData, resource_pattern: &str, remove_from_parents: bool) {
    let resources = tfdata.graphdict.keys_containing(resource_pattern);
    for resource in resources {
        if remove_from_parents {
            tfdata.graphdict.remove_node_and_refs(&resource);
        } else {
            tfdata.graphdict.remove_node(&resource);
        }
        tfdata.meta_data.remove(&resource);
        tracing::debug!(resource = %resource, "deleted node");
    }
}

/// Collect the provider's shared services into one container node.
pub fn group_shared_services(tfdata: &mut TfData, ctx: &ProviderContext, group_name: &str) {
    if !tfdata.graphdict.contains(group_name) {
        tfdata.graphdict.add_node(group_name);
        tfdata.meta_data.entry(group_name.to_string()).or_default();
    }

    for node in tfdata.graphdict.keys_snapshot() {
        let is_shared = ctx
            .shared_services
            .iter()
            .any(|pattern| node.contains(pattern));
        if is_shared && node != group_name {
            tfdata.graphdict.add_edge(group_name, &node);
        }
    }

    // Replace members that consolidate with their canonical form.
    let members = tfdata.graphdict.children(group_name).to_vec();
    let mut updated: Vec<String> = Vec::new();
    for member in members {
        let replacement = match ctx.consolidated_for(&member) {
            Some(rule) if !member.contains("cluster") => rule.resource_name.to_string(),
            _ => member,
        };
        if !updated.contains(&replacement) {
            updated.push(replacement);
        }
    }
    tfdata.graphdict.insert(group_name.to_string(), updated);
}

/// If `X -> A` and `B -> X`, add `A -> B` directly.
pub fn link_via_shared_child(
    tfdata: &mut TfData,
    ctx: &ProviderContext,
    source_pattern: &str,
    target_pattern: &str,
    remove_intermediate: bool,
) {
    let sources = tfdata.graphdict.keys_containing(source_pattern);
    let targets = tfdata.graphdict.keys_containing(target_pattern);

    for node in tfdata.graphdict.keys_snapshot() {
        for source in &sources {
            if !tfdata.graphdict.has_edge(&node, source) {
                continue;
            }
            for target in &targets {
                if !tfdata.graphdict.has_edge(target, &node) {
                    continue;
                }
                tfdata.graphdict.add_edge(source, target);
                if remove_intermediate {
                    tfdata.graphdict.remove_edge(&node, source);
                    for parent in tfdata.graphdict.parents_of(target) {
                        if !ctx.is_group_node(&parent) {
                            tfdata.graphdict.remove_edge(&parent, target);
                        }
                    }
                }
            }
        }
    }
}

/// If `M -> A` and `M -> B`, add `A -> B` and delete `M`.
pub fn link_peers_via_intermediary(
    tfdata: &mut TfData,
    intermediary_pattern: &str,
    source_pattern: &str,
    target_pattern: &str,
) {
    let intermediaries = tfdata.graphdict.keys_containing(intermediary_pattern);

    for intermediary in intermediaries {
        let connections = tfdata.graphdict.children(&intermediary).to_vec();
        let sources: Vec<&String> = connections.iter().filter(|c| c.contains(source_pattern)).collect();
        let targets: Vec<&String> = connections.iter().filter(|c| c.contains(target_pattern)).collect();
        if sources.is_empty() || targets.is_empty() {
            continue;
        }
        for source in &sources {
            for target in &targets {
                tfdata.graphdict.add_edge(source, target);
            }
        }
        tfdata.graphdict.remove_node_and_refs(&intermediary);
        tfdata.meta_data.remove(&intermediary);
        tracing::debug!(intermediary = %intermediary, "flattened intermediary into peer link");
    }
}

/// Add `source -> target` for every matching pair, optionally dropping
/// the reverse edge.
pub fn bidirectional_link(
    tfdata: &mut TfData,
    source_pattern: &str,
    target_pattern: &str,
    cleanup_reverse: bool,
) {
    let sources = tfdata.graphdict.keys_containing(source_pattern);
    let targets = tfdata.graphdict.keys_containing(target_pattern);

    for source in &sources {
        for target in &targets {
            if source == target {
                continue;
            }
            tfdata.graphdict.add_edge(source, target);
            if cleanup_reverse {
                tfdata.graphdict.remove_edge(target, source);
            }
        }
    }
}

/// Swap resource types based on a metadata keyword (config-driven
/// version of the variant pass).
pub fn apply_resource_variants(
    tfdata: &mut TfData,
    resource_pattern: &str,
    metadata_key: &str,
    variants: &[(String, String)],
) {
    let resources = tfdata.graphdict.keys_containing(resource_pattern);

    for resource in resources {
        let base = ids::strip_suffix(&resource);
        let value = tfdata
            .meta_data
            .get(base)
            .and_then(|m| m.get(metadata_key))
            .map(|v| v.to_string().to_lowercase())
            .unwrap_or_default();

        let Some((_, new_type)) = variants
            .iter()
            .find(|(keyword, _)| value.contains(&keyword.to_lowercase()))
        else {
            continue;
        };
        let renamed = format!("{new_type}.{}", ids::name_of(&resource));
        if renamed == resource || tfdata.graphdict.contains(&renamed) {
            continue;
        }
        if let Some(meta) = tfdata.meta_data.get(base).cloned() {
            tfdata.meta_data.insert(renamed.clone(), meta);
        }
        if let Err(error) = tfdata.graphdict.rename_node(&resource, &renamed) {
            tracing::warn!(resource = %resource, error = %error, "variant rename skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider;
    use crate::types::Metadata;
    use pretty_assertions::assert_eq;

    fn state() -> (TfData, ProviderContext) {
        (TfData::default(), provider::aws::context())
    }

    fn add_node(tfdata: &mut TfData, id: &str) {
        tfdata.graphdict.add_node(id);
        tfdata.meta_data.entry(id.to_string()).or_default();
        tfdata.node_list.push(id.to_string());
    }

    #[test]
    fn test_move_to_parent() {
        let (mut tfdata, _) = state();
        add_node(&mut tfdata, "aws_subnet.a");
        add_node(&mut tfdata, "aws_vpc.main");
        add_node(&mut tfdata, "aws_vpc_endpoint.s3");
        tfdata.graphdict.add_edge("aws_subnet.a", "aws_vpc_endpoint.s3");

        move_to_parent(&mut tfdata, "aws_vpc_endpoint", "aws_subnet", "aws_vpc.");

        assert!(tfdata.graphdict.children("aws_subnet.a").is_empty());
        assert_eq!(tfdata.graphdict.children("aws_vpc.main"), ["aws_vpc_endpoint.s3"]);
    }

    #[test]
    fn test_delete_nodes_cleans_parents() {
        let (mut tfdata, _) = state();
        add_node(&mut tfdata, "random_string.suffix");
        add_node(&mut tfdata, "aws_s3_bucket.data");
        tfdata.graphdict.add_edge("aws_s3_bucket.data", "random_string.suffix");

        delete_nodes(&mut tfdata, "random_string.", true);

        assert!(!tfdata.graphdict.contains("random_string.suffix"));
        assert!(tfdata.graphdict.children("aws_s3_bucket.data").is_empty());
        assert!(!tfdata.meta_data.contains_key("random_string.suffix"));
    }

    #[test]
    fn test_link_peers_via_intermediary_flattens_mapping() {
        let (mut tfdata, _) = state();
        add_node(&mut tfdata, "aws_sqs_queue.jobs");
        add_node(&mut tfdata, "aws_lambda_function.worker");
        add_node(&mut tfdata, "aws_lambda_event_source_mapping.m");
        tfdata
            .graphdict
            .add_edge("aws_lambda_event_source_mapping.m", "aws_sqs_queue.jobs");
        tfdata
            .graphdict
            .add_edge("aws_lambda_event_source_mapping.m", "aws_lambda_function.worker");

        link_peers_via_intermediary(
            &mut tfdata,
            "aws_lambda_event_source_mapping",
            "aws_sqs_queue",
            "aws_lambda_function",
        );

        assert!(!tfdata.graphdict.contains("aws_lambda_event_source_mapping.m"));
        assert_eq!(
            tfdata.graphdict.children("aws_sqs_queue.jobs"),
            ["aws_lambda_function.worker"]
        );
    }

    #[test]
    fn test_expand_to_numbered_instances() {
        let (mut tfdata, ctx) = state();
        add_node(&mut tfdata, "aws_subnet.a");
        add_node(&mut tfdata, "aws_subnet.b");
        add_node(&mut tfdata, "aws_eks_node_group.workers");

        let mut meta = Metadata::new();
        meta.insert(
            "subnet_ids".to_string(),
            AttrValue::List(vec![
                AttrValue::from("${aws_subnet.a.id}"),
                AttrValue::from("${aws_subnet.b.id}"),
            ]),
        );
        tfdata
            .meta_data
            .insert("aws_eks_node_group.workers".to_string(), meta);

        expand_to_numbered_instances(
            &mut tfdata,
            &ctx,
            "aws_eks_node_group",
            "subnet_ids",
            true,
        );

        assert!(!tfdata.graphdict.contains("aws_eks_node_group.workers"));
        assert_eq!(
            tfdata.graphdict.children("aws_subnet.a"),
            ["aws_eks_node_group.workers~1"]
        );
        assert_eq!(
            tfdata.graphdict.children("aws_subnet.b"),
            ["aws_eks_node_group.workers~2"]
        );
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let (mut tfdata, ctx) = state();
        add_node(&mut tfdata, "aws_subnet.a");
        add_node(&mut tfdata, "aws_subnet.b");
        add_node(&mut tfdata, "aws_eks_node_group.workers");
        let mut meta = Metadata::new();
        meta.insert(
            "subnet_ids".to_string(),
            AttrValue::from("${aws_subnet.a.id} ${aws_subnet.b.id}"),
        );
        tfdata
            .meta_data
            .insert("aws_eks_node_group.workers".to_string(), meta);

        expand_to_numbered_instances(&mut tfdata, &ctx, "aws_eks_node_group", "subnet_ids", true);
        let snapshot = tfdata.graphdict.clone();
        expand_to_numbered_instances(&mut tfdata, &ctx, "aws_eks_node_group", "subnet_ids", true);

        // No ~k~k suffixes, no changes on the second run.
        assert_eq!(tfdata.graphdict, snapshot);
        assert!(tfdata
            .graphdict
            .nodes()
            .all(|n| n.matches('~').count() <= 1));
    }

    #[test]
    fn test_bidirectional_link_cleanup() {
        let (mut tfdata, _) = state();
        add_node(&mut tfdata, "aws_efs_mount_target.a");
        add_node(&mut tfdata, "aws_efs_file_system.data");
        tfdata
            .graphdict
            .add_edge("aws_efs_file_system.data", "aws_efs_mount_target.a");

        bidirectional_link(
            &mut tfdata,
            "aws_efs_mount_target",
            "aws_efs_file_system",
            true,
        );

        assert_eq!(
            tfdata.graphdict.children("aws_efs_mount_target.a"),
            ["aws_efs_file_system.data"]
        );
        assert!(tfdata.graphdict.children("aws_efs_file_system.data").is_empty());
    }

    #[test]
    fn test_group_shared_services_consolidates_members() {
        let (mut tfdata, ctx) = state();
        add_node(&mut tfdata, "aws_kms_key.main");
        add_node(&mut tfdata, "aws_ecr_repository.app");
        add_node(&mut tfdata, "aws_instance.web");

        group_shared_services(&mut tfdata, &ctx, "aws_group.shared_services");

        let members = tfdata.graphdict.children("aws_group.shared_services");
        // KMS consolidates to its canonical node; ECR joins as-is.
        assert!(members.contains(&"aws_kms_key.kms".to_string()));
        assert!(members.contains(&"aws_ecr_repository.app".to_string()));
        assert!(!members.contains(&"aws_instance.web".to_string()));
    }
}
