//! Node consolidation (pipeline stage C6).
//!
//! Families of closely-related resource types collapse into a single
//! canonical node per the provider's consolidation table (e.g. every
//! `aws_route53_*` resource becomes `aws_route53_record.route_53`).
//! Edges and metadata merge into the canonical node, references in
//! every adjacency list are rewritten, self-loops introduced by the
//! rewrite are dropped, and `null_resource` nodes disappear entirely.

use crate::provider::ProviderContext;
use crate::types::TfData;

/// Run the consolidation pass. Idempotent: consolidating an already
/// consolidated graph changes nothing.
pub fn run(tfdata: &mut TfData, ctx: &ProviderContext) {
    // Collapse matching keys into their canonical nodes. Families with
    // their own handler (load balancers, ECS, EKS) are left for C9.
    for resource in tfdata.graphdict.keys_snapshot() {
        if ctx.is_special_family(&resource) {
            continue;
        }
        let Some(rule) = ctx.consolidated_for(&resource) else {
            continue;
        };
        let canonical = rule.resource_name.to_string();
        if resource == canonical {
            continue;
        }

        let children = tfdata.graphdict.remove_node(&resource).unwrap_or_default();
        for child in children {
            if child != canonical {
                tfdata.graphdict.add_edge(&canonical, &child);
            }
        }
        // Metadata merges with the consolidated resource's values
        // winning over what the canonical node already had.
        let meta = tfdata.meta_data.remove(&resource).unwrap_or_default();
        let canonical_meta = tfdata.meta_data.entry(canonical.clone()).or_default();
        for (key, value) in meta {
            canonical_meta.insert(key, value);
        }
        tfdata.graphdict.add_node(canonical.clone());
        tracing::debug!(resource = %resource, canonical = %canonical, "consolidated");
    }

    // Rewrite references to consolidated families everywhere.
    for node in tfdata.graphdict.keys_snapshot() {
        let children = tfdata.graphdict.children(&node).to_vec();
        let mut rewritten: Vec<String> = Vec::new();
        for child in children {
            let replacement = match ctx.consolidated_for(&child) {
                Some(rule) if !ctx.is_special_family(&child) => rule.resource_name.to_string(),
                _ => child,
            };
            if replacement != node && !rewritten.contains(&replacement) {
                rewritten.push(replacement);
            }
        }
        tfdata.graphdict.insert(node, rewritten);
    }

    tfdata.graphdict.remove_self_loops();

    // null_resource is plumbing, never drawn.
    for node in tfdata.graphdict.keys_snapshot() {
        if node.starts_with("null_resource") {
            tfdata.graphdict.remove_node_and_refs(&node);
            tfdata.meta_data.remove(&node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider;
    use crate::types::{AttrValue, Metadata};
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
    fn test_family_collapses_to_canonical() {
        let mut tfdata = tfdata_with(&[
            "aws_route53_zone.primary",
            "aws_route53_record.www",
            "aws_instance.web",
        ]);
        tfdata
            .graphdict
            .add_edge("aws_route53_zone.primary", "aws_instance.web");

        run(&mut tfdata, &provider::aws::context());

        assert!(!tfdata.graphdict.contains("aws_route53_zone.primary"));
        assert!(!tfdata.graphdict.contains("aws_route53_record.www"));
        assert!(tfdata.graphdict.contains("aws_route53_record.route_53"));
        assert_eq!(
            tfdata.graphdict.children("aws_route53_record.route_53"),
            ["aws_instance.web"]
        );
    }

    #[test]
    fn test_references_are_rewritten() {
        let mut tfdata = tfdata_with(&["aws_instance.web", "aws_kms_key.main"]);
        tfdata.graphdict.add_edge("aws_instance.web", "aws_kms_key.main");

        run(&mut tfdata, &provider::aws::context());

        assert_eq!(
            tfdata.graphdict.children("aws_instance.web"),
            ["aws_kms_key.kms"]
        );
    }

    #[test]
    fn test_metadata_merges_into_canonical() {
        let mut tfdata = tfdata_with(&["aws_kms_key.main"]);
        tfdata
            .meta_data
            .get_mut("aws_kms_key.main")
            .unwrap()
            .insert("description".to_string(), AttrValue::from("app key"));

        run(&mut tfdata, &provider::aws::context());

        assert_eq!(
            tfdata.meta_data["aws_kms_key.kms"]["description"].as_str(),
            Some("app key")
        );
    }

    #[test]
    fn test_null_resources_are_deleted() {
        let mut tfdata = tfdata_with(&["null_resource.wait", "aws_instance.web"]);
        tfdata.graphdict.add_edge("aws_instance.web", "null_resource.wait");

        run(&mut tfdata, &provider::aws::context());

        assert!(!tfdata.graphdict.contains("null_resource.wait"));
        assert!(tfdata.graphdict.children("aws_instance.web").is_empty());
    }

    #[test]
    fn test_consolidation_is_idempotent() {
        let mut tfdata = tfdata_with(&[
            "aws_route53_zone.primary",
            "aws_route53_record.www",
            "aws_instance.web",
        ]);
        tfdata
            .graphdict
            .add_edge("aws_instance.web", "aws_route53_zone.primary");

        let ctx = provider::aws::context();
        run(&mut tfdata, &ctx);
        let snapshot = tfdata.graphdict.clone();
        run(&mut tfdata, &ctx);
        assert_eq!(tfdata.graphdict, snapshot);
    }
}
