//! Imperative AWS handlers.
//!
//! These cover the reshaping rules too specific for the declarative op
//! vocabulary: availability-zone insertion, security-group wrapping,
//! load-balancer consolidation, EKS topologies, Helm releases, and
//! WAF associations.

use crate::error::{Result, TerracartaError};
use crate::graph::ids;
use crate::provider::ProviderContext;
use crate::types::{AttrValue, Metadata, TfData};
use super::transforms;

/// Suffix a zone name with its letter index: `…a` becomes `…~1`,
/// `…b` becomes `…~2`. Non-alphabetic endings pass through.
fn letter_suffix(s: &str) -> String {
    match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let index = (c.to_ascii_lowercase() as u32) - ('a' as u32) + 1;
            format!("{s}~{index}")
        }
        _ => s.to_string(),
    }
}

/// Generate the synthetic availability-zone node name for a subnet.
///
/// Prefers `availability_zone_id` when the zone name is unknown (the id
/// is more specific than the regional name and already unique).
pub fn generate_az_node_name(_subnet: &str, meta: &Metadata) -> String {
    let az_value = meta
        .get("availability_zone")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let az_id = meta
        .get("availability_zone_id")
        .and_then(AttrValue::as_str)
        .unwrap_or_default();

    if !az_id.is_empty() && (az_value == "True" || az_value == "unknown") {
        return format!("aws_az.availability_zone_{}", az_id.replace('-', "_"));
    }

    let az = format!("aws_az.availability_zone_{}", az_value.replace('-', "_"));
    letter_suffix(&az)
}

/// Copy zone metadata from the pristine snapshot so the AZ generator
/// sees it even after earlier passes rewrote the live values.
pub fn prepare_subnet_az_metadata(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let subnets: Vec<String> = tfdata
        .graphdict
        .keys_containing("aws_subnet")
        .into_iter()
        .filter(|s| !tfdata.hidden.contains(s))
        .collect();

    for subnet in subnets {
        let base = ids::strip_suffix(&subnet).to_string();
        let original = tfdata.original_metadata.get(&base).cloned().unwrap_or_default();
        let meta = tfdata.meta_data.entry(subnet.clone()).or_default();
        for key in ["availability_zone", "availability_zone_id", "region"] {
            if let Some(value) = original.get(key) {
                meta.insert(key.to_string(), value.clone());
            }
        }
    }
    Ok(())
}

/// VPC endpoints require a VPC to land in.
pub fn handle_vpc_endpoints(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let endpoints = tfdata.graphdict.keys_containing("aws_vpc_endpoint");
    if endpoints.is_empty() {
        return Ok(());
    }
    if tfdata.graphdict.keys_containing("aws_vpc.").is_empty() {
        return Err(TerracartaError::missing_resource(
            "aws_vpc",
            "aws_vpc_endpoint handler",
        ));
    }
    Ok(())
}

/// Move DB subnet groups from subnets up to the VPC, and point the VPC
/// at the protecting security group when the attached database has one.
pub fn handle_db_subnet_group(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let groups = tfdata.graphdict.keys_containing("aws_db_subnet_group");
    let vpcs = tfdata.graphdict.keys_containing("aws_vpc.");

    for group in &groups {
        let subnet_parents: Vec<String> = tfdata
            .graphdict
            .parents_of(group)
            .into_iter()
            .filter(|p| p.contains("aws_subnet"))
            .collect();
        for subnet in subnet_parents {
            tfdata.graphdict.remove_edge(&subnet, group);
            // Walk subnet -> AZ -> VPC to find the right container.
            for az in tfdata.graphdict.parents_of(&subnet) {
                if !az.contains("aws_az") {
                    continue;
                }
                for vpc in tfdata.graphdict.parents_of(&az) {
                    if vpc.contains("aws_vpc") {
                        tfdata.graphdict.add_edge(&vpc, group);
                    }
                }
            }
        }

        // Databases inside a security group replace themselves with the
        // group at VPC level.
        let connections = tfdata.graphdict.children(group).to_vec();
        for connection in connections {
            let wrapping_sgs: Vec<String> = tfdata
                .graphdict
                .parents_of(&connection)
                .into_iter()
                .filter(|p| p.contains("aws_security_group"))
                .collect();
            if wrapping_sgs.is_empty() {
                continue;
            }
            for vpc in &vpcs {
                if tfdata.graphdict.remove_edge(vpc, &connection) {
                    for sg in &wrapping_sgs {
                        tfdata.graphdict.add_edge(vpc, sg);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Security-group wrapping.
///
/// A resource referencing a security group moves *inside* it: the SG
/// becomes a container holding the resource, and the SG replaces the
/// resource in its parent subnets. Security-group *rules* are resolved
/// away entirely.
pub fn handle_security_groups(tfdata: &mut TfData, ctx: &ProviderContext) -> Result<()> {
    // Rules first: they are bookkeeping, not boxes.
    let rules = tfdata.graphdict.keys_containing("aws_security_group_rule");
    for rule in rules {
        tfdata.graphdict.remove_node_and_refs(&rule);
        tfdata.meta_data.remove(&rule);
    }

    // Wrap resources that point at a security group.
    let mut bound: Vec<(String, String)> = Vec::new();
    for node in tfdata.graphdict.keys_snapshot() {
        if ids::type_of(&node) == "aws_security_group" || ctx.is_group_node(&node) {
            continue;
        }
        for child in tfdata.graphdict.children(&node) {
            if ids::strip_module(child).starts_with("aws_security_group.") {
                bound.push((node.clone(), child.clone()));
            }
        }
    }
    bound.sort();

    for (target, sg) in bound {
        tfdata.graphdict.remove_edge(&target, &sg);

        // A numbered target gets a matching numbered SG container so
        // every subnet replica keeps its own boundary.
        let container = match ids::suffix_of(&target) {
            Some(suffix) => ids::with_suffix(ids::strip_suffix(&sg), suffix),
            None => sg.clone(),
        };
        if !tfdata.graphdict.contains(&container) {
            tfdata.graphdict.add_node(container.clone());
            if let Some(meta) = tfdata.metadata_of(&sg).cloned() {
                tfdata.meta_data.insert(container.clone(), meta);
            }
        }
        tfdata.graphdict.add_edge(&container, &target);

        // Replace the resource with its container in parent subnets.
        for parent in tfdata.graphdict.parents_of(&target) {
            if parent == container {
                continue;
            }
            if ids::strip_module(&parent).starts_with("aws_subnet") {
                tfdata.graphdict.remove_edge(&parent, &target);
                tfdata.graphdict.add_edge(&parent, &container);
            }
        }
    }

    // Security groups do not sit at VPC level.
    let sgs = tfdata.graphdict.keys_containing("aws_security_group");
    for sg in &sgs {
        for vpc in tfdata.graphdict.keys_containing("aws_vpc.") {
            tfdata.graphdict.remove_edge(&vpc, sg);
        }
    }

    // Orphan groups disappear.
    for sg in sgs {
        let empty = tfdata.graphdict.children(&sg).is_empty();
        let parentless = tfdata.graphdict.parents_of(&sg).is_empty();
        if empty && parentless {
            tfdata.graphdict.remove_node(&sg);
        }
    }
    Ok(())
}

/// Load balancers: expand across subnets, consolidate under a single
/// `aws_lb.elb` service node, and rewire traffic direction.
pub fn handle_load_balancer(tfdata: &mut TfData, ctx: &ProviderContext) -> Result<()> {
    let bases: Vec<String> = tfdata
        .graphdict
        .keys_containing("aws_lb.")
        .into_iter()
        .filter(|lb| !lb.ends_with(".elb") && !lb.contains('~'))
        .collect();
    if bases.is_empty() {
        return Ok(());
    }

    // Variant pick comes from the unexpanded metadata.
    let variant = bases
        .iter()
        .find_map(|lb| {
            tfdata
                .metadata_of(lb)
                .and_then(|meta| ctx.check_variant(lb, meta))
        })
        .unwrap_or("aws_lb");

    // Multi-subnet expansion per the provider's trigger attributes.
    for pattern in &ctx.multi_instance_patterns {
        if !pattern.resource_types.contains(&"aws_lb") {
            continue;
        }
        for trigger in pattern.trigger_attributes {
            transforms::expand_to_numbered_instances(tfdata, ctx, "aws_lb.", trigger, true);
        }
    }

    let elb = "aws_lb.elb";
    if !tfdata.graphdict.contains(elb) {
        tfdata.graphdict.add_node(elb);
        let mut meta = bases
            .first()
            .and_then(|lb| tfdata.metadata_of(lb).cloned())
            .unwrap_or_default();
        meta.insert("variant".to_string(), AttrValue::from(variant));
        tfdata.meta_data.insert(elb.to_string(), meta);
    }

    for base in &bases {
        let instances: Vec<String> = if tfdata.graphdict.contains(base) {
            vec![base.clone()]
        } else {
            tfdata
                .graphdict
                .keys_containing(&format!("{base}~"))
        };

        let mut max_count: i64 = instances.len().max(1) as i64;
        for instance in &instances {
            // Targets hang off the consolidated service node instead of
            // each replica.
            let children = tfdata.graphdict.children(instance).to_vec();
            for child in children {
                if ctx.is_shared_service(&child)
                    || ids::strip_module(&child).starts_with("aws_security_group")
                {
                    continue;
                }
                if let Some(count) = tfdata.count_of(&child) {
                    max_count = max_count.max(count);
                }
                tfdata.graphdict.remove_edge(instance, &child);
                tfdata.graphdict.add_edge(elb, &child);
            }

            // Compute resources never point back at the balancer.
            for parent in tfdata.graphdict.parents_of(instance) {
                if !ctx.is_group_node(&parent) && !ctx.is_shared_service(&parent) {
                    tfdata.graphdict.remove_edge(&parent, instance);
                }
            }
            tfdata.graphdict.add_edge(elb, instance);
        }

        tfdata
            .meta_data
            .entry(elb.to_string())
            .or_default()
            .insert("count".to_string(), AttrValue::Int(max_count));
    }
    Ok(())
}

/// ECS services span the subnets their network configuration names.
pub fn handle_ecs(tfdata: &mut TfData, ctx: &ProviderContext) -> Result<()> {
    for key in ["subnets", "network_configuration"] {
        transforms::expand_to_numbered_instances(tfdata, ctx, "aws_ecs_service", key, true);
    }
    Ok(())
}

/// EKS cluster topology.
///
/// Creates a control-plane group around each cluster. Clusters with
/// node groups or Fargate profiles leave the subnets (their workers sit
/// there instead); clusters without either expand into one replica per
/// subnet (the Karpenter shape).
pub fn handle_eks(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let clusters = tfdata.graphdict.keys_containing("aws_eks_cluster");
    if clusters.is_empty() {
        return Ok(());
    }
    let has_node_groups = !tfdata.graphdict.keys_containing("aws_eks_node_group").is_empty();
    let has_fargate = !tfdata
        .graphdict
        .keys_containing("aws_eks_fargate_profile")
        .is_empty();

    for cluster in clusters {
        if cluster.contains('~') {
            continue;
        }
        let cluster_name = ids::name_of(&cluster).to_string();
        let control_plane = format!("aws_account.eks_control_plane_{cluster_name}");

        if !tfdata.graphdict.contains(&control_plane) {
            tfdata.graphdict.add_node(control_plane.clone());
            let mut meta = Metadata::new();
            meta.insert("type".to_string(), AttrValue::from("eks_service"));
            meta.insert(
                "name".to_string(),
                AttrValue::from(format!("EKS Service - {cluster_name}")),
            );
            tfdata.meta_data.insert(control_plane.clone(), meta);
        }
        tfdata.graphdict.add_edge(&control_plane, &cluster);

        if has_node_groups || has_fargate {
            // Workers live in the subnets; the control plane does not.
            for node in tfdata.graphdict.keys_snapshot() {
                if matches!(ids::type_of(&node), "aws_vpc" | "aws_subnet" | "aws_az") {
                    tfdata.graphdict.remove_edge(&node, &cluster);
                }
            }
            // The control plane drives each worker replica.
            for group in tfdata.graphdict.keys_containing("aws_eks_node_group") {
                tfdata.graphdict.add_edge(&cluster, &group);
            }
            for profile in tfdata.graphdict.keys_containing("aws_eks_fargate_profile") {
                tfdata.graphdict.add_edge(&cluster, &profile);
            }
        } else {
            // Karpenter shape: one cluster replica per subnet.
            let mut subnets: Vec<String> = tfdata
                .graphdict
                .keys_containing("aws_subnet")
                .into_iter()
                .filter(|subnet| tfdata.graphdict.has_edge(subnet, &cluster))
                .collect();
            subnets.sort();
            if subnets.len() > 1 {
                for (i, subnet) in subnets.iter().enumerate() {
                    let clone = ids::with_suffix(&cluster, (i + 1) as u32);
                    tfdata.graphdict.add_node(clone.clone());
                    if let Some(meta) = tfdata.meta_data.get(&cluster).cloned() {
                        tfdata.meta_data.insert(clone.clone(), meta);
                    }
                    tfdata.graphdict.remove_edge(subnet, &cluster);
                    tfdata.graphdict.add_edge(subnet, &clone);
                    tfdata.graphdict.add_edge(&cluster, &clone);
                }
            }
        }
    }
    Ok(())
}

/// Helm releases are classified by chart. Karpenter synthesizes
/// `tv_karpenter.*` replicas alongside the cluster; anything else just
/// points at the first cluster.
pub fn handle_helm_release(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let releases = tfdata.graphdict.keys_containing("helm_release");
    let clusters = tfdata.graphdict.keys_containing("aws_eks_cluster");
    if clusters.is_empty() {
        return Ok(());
    }

    for release in releases {
        let chart = tfdata
            .metadata_of(&release)
            .and_then(|meta| meta.get("chart"))
            .and_then(AttrValue::as_str)
            .unwrap_or_default()
            .to_lowercase();

        if chart == "karpenter" {
            synthesize_karpenter(tfdata, &release)?;
        } else {
            tfdata.graphdict.add_edge(&release, &clusters[0]);
        }
    }
    Ok(())
}

fn synthesize_karpenter(tfdata: &mut TfData, release: &str) -> Result<()> {
    let renamed = ids::strip_module(release).replace("helm_release", "tv_karpenter");
    tfdata.graphdict.rename_node(release, &renamed)?;
    if let Some(meta) = tfdata.meta_data.remove(release) {
        tfdata.meta_data.insert(renamed.clone(), meta);
    }

    // Karpenter provisions per-AZ capacity: one replica per private
    // subnet, private by naming convention, else every subnet.
    let mut subnets: Vec<String> = tfdata
        .graphdict
        .keys_containing("aws_subnet")
        .into_iter()
        .filter(|s| s.to_lowercase().contains("private"))
        .collect();
    if subnets.is_empty() {
        subnets = tfdata.graphdict.keys_containing("aws_subnet");
    }
    subnets.sort();
    if subnets.is_empty() {
        return Ok(());
    }

    let node_groups = tfdata.graphdict.keys_containing("aws_eks_node_group");
    let base_group = node_groups.first().map(|g| ids::strip_suffix(g).to_string());

    for (i, subnet) in subnets.iter().enumerate() {
        let replica = ids::with_suffix(&renamed, (i + 1) as u32);
        tfdata.graphdict.add_node(replica.clone());
        if let Some(meta) = tfdata.meta_data.get(&renamed).cloned() {
            tfdata.meta_data.insert(replica.clone(), meta);
        }
        tfdata.graphdict.add_edge(subnet, &replica);
        if let Some(base) = &base_group {
            let numbered_group = ids::with_suffix(base, (i + 1) as u32);
            if tfdata.graphdict.contains(&numbered_group) {
                tfdata.graphdict.add_edge(&replica, &numbered_group);
            }
        }
    }

    // The unnumbered node was only a template for the replicas.
    tfdata.graphdict.remove_node_and_refs(&renamed);
    tfdata.meta_data.remove(&renamed);
    Ok(())
}

/// Application auto-scaling targets become group nodes wrapping the
/// services they scale, and push their capacity into the service count.
pub fn handle_autoscaling(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let targets = tfdata.graphdict.keys_containing("aws_appautoscaling_target");

    for target in targets {
        let capacity = tfdata
            .metadata_of(&target)
            .and_then(|m| m.get("max_capacity"))
            .and_then(AttrValue::as_int);

        let scaled: Vec<String> = tfdata.graphdict.children(&target).to_vec();
        for service in scaled {
            if let Some(capacity) = capacity {
                if let Some(meta) = tfdata.meta_data.get_mut(ids::strip_suffix(&service)) {
                    meta.entry("count".to_string())
                        .or_insert(AttrValue::Int(capacity));
                }
            }
            // Subnet -> service becomes subnet -> autoscaling group.
            for parent in tfdata.graphdict.parents_of(&service) {
                if parent != target && ids::type_of(&parent) == "aws_subnet" {
                    tfdata.graphdict.remove_edge(&parent, &service);
                    tfdata.graphdict.add_edge(&parent, &target);
                }
            }
        }
    }
    Ok(())
}

/// CloudFront: resolve origin domain names to known nodes and link the
/// distribution to its certificate when one is configured.
pub fn handle_cloudfront_origins(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let distributions = tfdata.graphdict.keys_containing("aws_cloudfront");

    for cf in distributions {
        let Some(meta) = tfdata.metadata_of(&cf).cloned() else {
            continue;
        };

        if let Some(viewer) = meta.get("viewer_certificate") {
            if viewer.to_string().contains("acm_certificate_arn") {
                let acm = tfdata
                    .graphdict
                    .find_containing("aws_acm_certificate")
                    .cloned()
                    .unwrap_or_else(|| "aws_acm_certificate.acm".to_string());
                tfdata.graphdict.add_edge(&cf, &acm);
                tfdata.graphdict.add_node(acm);
            }
        }

        let Some(origin) = meta.get("origin") else {
            continue;
        };
        let mut leaves = Vec::new();
        origin.string_leaves(&mut leaves);
        let origin_text = leaves.join(" ");

        // An origin domain that appears in another node's metadata means
        // the distribution fronts that node.
        for node in tfdata.graphdict.keys_snapshot() {
            if node == cf || !origin_text.contains(ids::name_of(&node)) {
                continue;
            }
            let matches_domain = tfdata.metadata_of(&node).is_some_and(|m| {
                let mut node_leaves = Vec::new();
                for value in m.values() {
                    value.string_leaves(&mut node_leaves);
                }
                node_leaves
                    .iter()
                    .any(|leaf| !leaf.is_empty() && origin_text.contains(*leaf))
            });
            if matches_domain {
                tfdata.graphdict.add_edge(&cf, &node);
            }
        }
    }
    Ok(())
}

/// WAF web-ACL associations connect the ACL to what it protects, then
/// disappear.
pub fn handle_waf_associations(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let associations = tfdata
        .graphdict
        .keys_containing("aws_wafv2_web_acl_association");

    for association in associations {
        let connections = tfdata.graphdict.children(&association).to_vec();
        let meta_text = tfdata
            .metadata_of(&association)
            .map(|m| {
                let mut leaves = Vec::new();
                for value in m.values() {
                    value.string_leaves(&mut leaves);
                }
                leaves.join(" ")
            })
            .unwrap_or_default();

        let mut acls: Vec<String> = connections
            .iter()
            .filter(|c| c.contains("aws_wafv2_web_acl.") && !c.contains("association"))
            .cloned()
            .collect();
        let mut protected: Vec<String> = connections
            .iter()
            .filter(|c| {
                c.contains("aws_lb")
                    || c.contains("aws_alb")
                    || c.contains("aws_cloudfront")
                    || c.contains("aws_api_gateway")
                    || c.contains("aws_apigatewayv2")
            })
            .cloned()
            .collect();

        // Fall back to metadata references when the planner graph did
        // not record the edges.
        if acls.is_empty() {
            acls = tfdata
                .graphdict
                .keys_containing("aws_wafv2_web_acl.")
                .into_iter()
                .filter(|c| !c.contains("association") && meta_text.contains(ids::name_of(c)))
                .collect();
        }
        if protected.is_empty() {
            protected = tfdata
                .graphdict
                .keys_snapshot()
                .into_iter()
                .filter(|c| {
                    (c.contains("aws_lb") || c.contains("aws_cloudfront") || c.contains("aws_api_gateway"))
                        && meta_text.contains(ids::name_of(c))
                })
                .collect();
        }

        for acl in &acls {
            for target in &protected {
                tfdata.graphdict.add_edge(acl, target);
                tfdata.graphdict.remove_edge(target, acl);
            }
        }
        tfdata.graphdict.remove_node_and_refs(&association);
        tfdata.meta_data.remove(&association);
    }
    Ok(())
}
