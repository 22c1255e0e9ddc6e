//! Imperative GCP handlers.
//!
//! GCP subnets are regional and instances are zonal, so the hierarchy
//! inserts synthetic `tv_gcp_region.*` and `tv_gcp_zone.*` containers.
//! Load-balancer plumbing (forwarding rule, proxy, URL map, backend
//! service, health checks) is gathered into one `tv_gcp_load_balancer`
//! group per forwarding rule.

use crate::error::Result;
use crate::graph::ids;
use crate::provider::ProviderContext;
use crate::types::{AttrValue, Metadata, TfData};

/// Generate the synthetic region node name for a regional resource.
pub fn generate_region_node_name(_resource: &str, meta: &Metadata) -> String {
    let region = meta
        .get("region")
        .and_then(AttrValue::as_str)
        .unwrap_or("unknown-region");
    format!("tv_gcp_region.{}", region.replace('-', "_"))
}

/// Generate the synthetic zone node name for a zonal resource.
pub fn generate_zone_node_name(_resource: &str, meta: &Metadata) -> String {
    let zone = meta
        .get("zone")
        .and_then(AttrValue::as_str)
        .unwrap_or("unknown-zone");
    format!("tv_gcp_zone.{}", zone.replace('-', "_"))
}

/// Copy `region` (or `location`) from the pristine metadata onto every
/// regional resource so the region generator can see it.
pub fn prepare_region_metadata(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    const REGIONAL_TYPES: &[&str] = &[
        "google_compute_subnetwork",
        "google_container_cluster",
        "google_compute_instance_template",
        "google_compute_region_instance_group_manager",
    ];

    let regional: Vec<String> = tfdata
        .graphdict
        .keys_snapshot()
        .into_iter()
        .filter(|node| {
            let stripped = ids::strip_module(node);
            REGIONAL_TYPES.iter().any(|t| stripped.starts_with(t))
                && !tfdata.hidden.contains(node)
        })
        .collect();

    for resource in regional {
        let base = ids::strip_suffix(&resource).to_string();
        let original = tfdata.original_metadata.get(&base).cloned().unwrap_or_default();
        let region = original
            .get("region")
            .or_else(|| original.get("location"))
            .cloned();
        if let Some(region) = region {
            tfdata
                .meta_data
                .entry(resource)
                .or_default()
                .insert("region".to_string(), region);
        }
    }
    Ok(())
}

/// Place instance group managers under per-subnet zone containers and
/// populate them with synthetic VM instances.
///
/// Several subnets may share a physical zone, so the zone node is made
/// unique per parent subnet by suffixing the subnet's position. Reads
/// subnet relationships from the pristine snapshot because other
/// handlers may already have moved the templates.
pub fn link_instance_groups_to_zones(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let managers: Vec<String> = tfdata
        .graphdict
        .keys_containing("google_compute_instance_group_manager")
        .into_iter()
        .chain(
            tfdata
                .graphdict
                .keys_containing("google_compute_region_instance_group_manager"),
        )
        .collect();

    let mut subnets = tfdata.graphdict.keys_containing("google_compute_subnetwork");
    subnets.sort();

    for manager in managers {
        let meta = tfdata.metadata_of(&manager).cloned().unwrap_or_default();
        let zone_base = generate_zone_node_name(&manager, &meta);

        // Find the subnet the manager's template points at, preferring
        // the pristine graph.
        let template_refs: Vec<String> = tfdata
            .original_graphdict
            .children(ids::strip_suffix(&manager))
            .iter()
            .filter(|c| c.contains("instance_template"))
            .cloned()
            .collect();
        let mut parent_subnets: Vec<String> = subnets
            .iter()
            .filter(|subnet| {
                tfdata.original_graphdict.has_edge(subnet, ids::strip_suffix(&manager))
                    || template_refs
                        .iter()
                        .any(|t| tfdata.original_graphdict.has_edge(subnet, t))
            })
            .cloned()
            .collect();
        if parent_subnets.is_empty() {
            parent_subnets = subnets.clone();
        }

        for subnet in &parent_subnets {
            let position = subnets.iter().position(|s| s == subnet).unwrap_or(0) + 1;
            // Distinct zone node per subnet even when the physical zone
            // is shared.
            let zone_node = if parent_subnets.len() > 1 || subnets.len() > 1 {
                ids::with_suffix(&zone_base, position as u32)
            } else {
                zone_base.clone()
            };

            tfdata.graphdict.add_node(zone_node.clone());
            tfdata.meta_data.entry(zone_node.clone()).or_default();
            tfdata.graphdict.remove_edge(subnet, &manager);
            tfdata.graphdict.add_edge(subnet, &zone_node);
            tfdata.graphdict.add_edge(&zone_node, &manager);
        }

        // Synthetic VM instances sized by target_size.
        let target_size = meta
            .get("target_size")
            .and_then(AttrValue::as_int)
            .unwrap_or(0);
        for i in 1..=target_size {
            let vm = format!(
                "tv_gcp_vm.{}~{i}",
                ids::name_of(&manager)
            );
            tfdata.graphdict.add_node(vm.clone());
            tfdata.meta_data.entry(vm.clone()).or_default();
            tfdata.graphdict.add_edge(&manager, &vm);
        }
    }
    Ok(())
}

/// Gather load-balancer plumbing into a `tv_gcp_load_balancer` group
/// and restore the component chain the planner reported as computed:
/// forwarding rule -> target proxy -> URL map -> backend service.
pub fn group_load_balancer_components(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    const COMPONENT_TYPES: &[&str] = &[
        "google_compute_forwarding_rule",
        "google_compute_global_forwarding_rule",
        "google_compute_target_http_proxy",
        "google_compute_target_https_proxy",
        "google_compute_url_map",
        "google_compute_backend_service",
        "google_compute_health_check",
        "google_compute_http_health_check",
    ];

    let forwarding_rules: Vec<String> = tfdata
        .graphdict
        .keys_snapshot()
        .into_iter()
        .filter(|n| ids::type_of(n).contains("forwarding_rule"))
        .collect();
    if forwarding_rules.is_empty() {
        return Ok(());
    }

    let components: Vec<String> = tfdata
        .graphdict
        .keys_snapshot()
        .into_iter()
        .filter(|node| {
            let stripped = ids::strip_module(node);
            COMPONENT_TYPES.iter().any(|t| stripped.starts_with(t))
        })
        .collect();

    for rule in &forwarding_rules {
        let group = format!("tv_gcp_load_balancer.{}", ids::name_of(rule));
        if tfdata.graphdict.contains(&group) {
            continue;
        }
        tfdata.graphdict.add_node(group.clone());
        tfdata.meta_data.entry(group.clone()).or_default();

        for component in &components {
            tfdata.graphdict.add_edge(&group, component);
            // Components leave their old top-level parents; outgoing
            // edges to backends are preserved on the component itself.
            for parent in tfdata.graphdict.parents_of(component) {
                if parent != group && !COMPONENT_TYPES.iter().any(|t| parent.starts_with(t)) {
                    tfdata.graphdict.remove_edge(&parent, component);
                }
            }
        }

        restore_chain_edges(tfdata, &components);
    }
    Ok(())
}

/// Re-add the canonical component chain when the planner marked the
/// connecting attributes as computed.
fn restore_chain_edges(tfdata: &mut TfData, components: &[String]) {
    let find = |keyword: &str| -> Vec<String> {
        components
            .iter()
            .filter(|c| c.contains(keyword))
            .cloned()
            .collect()
    };
    let chain: [(Vec<String>, Vec<String>); 3] = [
        (find("forwarding_rule"), find("target_http")),
        (find("target_http"), find("url_map")),
        (find("url_map"), find("backend_service")),
    ];
    for (sources, targets) in chain {
        for source in &sources {
            for target in &targets {
                tfdata.graphdict.add_edge(source, target);
            }
        }
    }
    // Backend services watch their health checks.
    for backend in find("backend_service") {
        for check in find("health_check") {
            tfdata.graphdict.add_edge(&backend, &check);
        }
    }
}

/// GKE clusters group like EKS ones: a control-plane container holds
/// the cluster, node pools sit in their subnets.
pub fn handle_gke(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let clusters = tfdata.graphdict.keys_containing("google_container_cluster");
    let pools = tfdata.graphdict.keys_containing("google_container_node_pool");

    for cluster in clusters {
        if cluster.contains('~') {
            continue;
        }
        let name = ids::name_of(&cluster).to_string();
        let group = format!("tv_gcp_account.gke_control_plane_{name}");
        tfdata.graphdict.add_node(group.clone());
        tfdata.meta_data.entry(group.clone()).or_default();
        tfdata.graphdict.add_edge(&group, &cluster);

        for pool in &pools {
            tfdata.graphdict.add_edge(&cluster, pool);
            // Pools stay in subnets; the cluster itself does not.
            for subnet in tfdata.graphdict.keys_containing("google_compute_subnetwork") {
                tfdata.graphdict.remove_edge(&subnet, &cluster);
            }
        }
    }
    Ok(())
}
