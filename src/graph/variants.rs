//! Variant selection (pipeline stage C8).
//!
//! Some resource types have more specific renditions chosen by a
//! metadata keyword (an `aws_ecs_service` running on FARGATE becomes
//! `aws_fargate`, an `aws_lb` of type network becomes `aws_nlb`). The
//! pass renames matching nodes and the references to them. Types with
//! their own C9 handler are skipped, as is anything already placed in
//! the shared-services group.

use crate::graph::ids;
use crate::provider::ProviderContext;
use crate::types::TfData;

/// Run the variant pass.
pub fn run(tfdata: &mut TfData, ctx: &ProviderContext) {
    let shared_group = ctx.shared_group_id();
    let shared_members: Vec<String> = tfdata.graphdict.children(&shared_group).to_vec();

    for node in tfdata.graphdict.keys_snapshot() {
        if !tfdata.graphdict.contains(&node) {
            // Renamed away by an earlier iteration.
            continue;
        }
        if !ctx.owns(&node) || ctx.is_special_exact(&node) {
            continue;
        }
        if node.starts_with(&shared_group) || shared_members.contains(&node) {
            continue;
        }

        let base = ids::strip_suffix(&node).to_string();
        let Some(meta) = tfdata.meta_data.get(&base) else {
            continue;
        };
        let Some(variant) = ctx.check_variant(&base, meta) else {
            continue;
        };

        let renamed = match ids::suffix_of(&node) {
            Some(suffix) => format!("{variant}.{}~{suffix}", ids::name_of(&node)),
            None => format!("{variant}.{}", ids::name_of(&node)),
        };
        if renamed == node {
            continue;
        }
        if let Some(meta) = tfdata.meta_data.get(&base).cloned() {
            tfdata
                .meta_data
                .entry(ids::strip_suffix(&renamed).to_string())
                .or_insert(meta);
        }
        match tfdata.graphdict.rename_node(&node, &renamed) {
            Ok(()) => {
                tracing::debug!(node = %node, renamed = %renamed, "variant applied");
            }
            Err(error) => {
                tracing::warn!(node = %node, error = %error, "variant rename collision, keeping original");
            }
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
    fn test_fargate_variant_renames_node_and_references() {
        let mut tfdata = tfdata_with(&["aws_ecs_service.app", "aws_subnet.a"]);
        tfdata
            .meta_data
            .get_mut("aws_ecs_service.app")
            .unwrap()
            .insert("launch_type".to_string(), AttrValue::from("FARGATE"));
        tfdata.graphdict.add_edge("aws_subnet.a", "aws_ecs_service.app");

        run(&mut tfdata, &provider::aws::context());

        assert!(tfdata.graphdict.contains("aws_fargate.app"));
        assert!(!tfdata.graphdict.contains("aws_ecs_service.app"));
        assert_eq!(tfdata.graphdict.children("aws_subnet.a"), ["aws_fargate.app"]);
    }

    #[test]
    fn test_special_exact_types_are_skipped() {
        // aws_lb has its own handler; C8 leaves it alone even though a
        // variant rule matches its metadata.
        let mut tfdata = tfdata_with(&["aws_lb.web"]);
        tfdata
            .meta_data
            .get_mut("aws_lb.web")
            .unwrap()
            .insert("load_balancer_type".to_string(), AttrValue::from("application"));

        run(&mut tfdata, &provider::aws::context());

        assert!(tfdata.graphdict.contains("aws_lb.web"));
        assert!(!tfdata.graphdict.contains("aws_alb.web"));
    }

    #[test]
    fn test_numbered_clone_keeps_suffix() {
        let mut tfdata = tfdata_with(&["aws_ecs_service.app~2"]);
        tfdata.meta_data.insert("aws_ecs_service.app".to_string(), {
            let mut meta = Metadata::new();
            meta.insert("launch_type".to_string(), AttrValue::from("FARGATE"));
            meta
        });

        run(&mut tfdata, &provider::aws::context());

        assert!(tfdata.graphdict.contains("aws_fargate.app~2"));
    }

    #[test]
    fn test_no_keyword_no_rename() {
        let mut tfdata = tfdata_with(&["aws_ecs_service.app"]);
        run(&mut tfdata, &provider::aws::context());
        assert!(tfdata.graphdict.contains("aws_ecs_service.app"));
    }
}
