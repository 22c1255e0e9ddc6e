//! Imperative Azure handlers.
//!
//! Azure's containment chain is resource group > virtual network >
//! subnet, with synthetic `tv_azurerm_zone.*` containers inside subnets
//! for zoned VMs and scale sets. Network security groups re-wrap the
//! resources of the subnets they are associated with, which alters the
//! subnet's direct containment; that mirrors the association resources
//! in the plan.
//!
//! The zone-container and backend-matching passes need numbered clones
//! to exist, so they run from the provider's post-expansion hook list
//! rather than from the C9 dispatch.

use crate::error::Result;
use crate::eval::postfix;
use crate::graph::ids;
use crate::provider::ProviderContext;
use crate::types::{AttrValue, TfData};
use super::transforms;

/// VM resource types, scale sets excluded.
const VM_TYPES: &[&str] = &[
    "azurerm_virtual_machine",
    "azurerm_linux_virtual_machine",
    "azurerm_windows_virtual_machine",
];

/// Zonal resource types that get per-zone containers after expansion.
const ZONAL_TYPES: &[&str] = &[
    "azurerm_linux_virtual_machine_scale_set",
    "azurerm_windows_virtual_machine_scale_set",
    "azurerm_virtual_machine_scale_set",
    "azurerm_kubernetes_cluster_node_pool",
];

fn is_vm(node: &str) -> bool {
    let node_type = ids::type_of(node);
    VM_TYPES.iter().any(|t| node_type == *t) && !node.contains("scale_set")
}

/// Subnet keys, skipping the association plumbing resources.
fn subnet_keys(tfdata: &TfData) -> Vec<String> {
    tfdata
        .graphdict
        .keys_containing("azurerm_subnet")
        .into_iter()
        .filter(|s| !s.contains("association"))
        .collect()
}

/// Joined string form of a node's metadata leaves.
fn meta_text(tfdata: &TfData, node: &str) -> String {
    tfdata
        .metadata_of(node)
        .map(|m| {
            let mut leaves = Vec::new();
            for value in m.values() {
                value.string_leaves(&mut leaves);
            }
            leaves.join(" ")
        })
        .unwrap_or_default()
}

/// Resource groups contain everything that names them.
///
/// Planner edges run resource -> resource group; containment needs the
/// opposite, so matching edges flip, and resources whose
/// `resource_group_name` metadata names the group gain a containment
/// edge even without a planner edge.
pub fn handle_resource_group(tfdata: &mut TfData, ctx: &ProviderContext) -> Result<()> {
    let groups = tfdata.graphdict.keys_containing("azurerm_resource_group");

    for group in &groups {
        let group_name = tfdata
            .metadata_of(group)
            .and_then(|m| m.get("name"))
            .and_then(AttrValue::as_str)
            .unwrap_or_else(|| ids::name_of(group))
            .to_string();

        for node in tfdata.graphdict.keys_snapshot() {
            if &node == group || !ctx.owns(&node) {
                continue;
            }
            if tfdata.graphdict.remove_edge(&node, group) {
                tfdata.graphdict.add_edge(group, &node);
                continue;
            }
            let references_group = tfdata
                .metadata_of(&node)
                .and_then(|m| m.get("resource_group_name"))
                .map(|v| v.to_string())
                .is_some_and(|v| v.contains(&group_name) || v.contains(ids::name_of(group)));
            if references_group {
                tfdata.graphdict.add_edge(group, &node);
            }
        }
    }
    Ok(())
}

/// Virtual networks contain their subnets; only the VNet stays at
/// resource-group level.
pub fn handle_virtual_network(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let vnets = tfdata.graphdict.keys_containing("azurerm_virtual_network");
    let subnets = tfdata.graphdict.keys_containing("azurerm_subnet.");

    for vnet in &vnets {
        let vnet_name = ids::name_of(vnet).to_string();
        for subnet in &subnets {
            let belongs = tfdata.graphdict.has_edge(vnet, subnet)
                || tfdata
                    .metadata_of(subnet)
                    .and_then(|m| m.get("virtual_network_name"))
                    .map(|v| v.to_string())
                    .is_some_and(|v| v.contains(&vnet_name));
            if !belongs {
                continue;
            }
            tfdata.graphdict.add_edge(vnet, subnet);
            tfdata.graphdict.remove_edge(subnet, vnet);
            // Subnets live inside the VNet, not beside it.
            for rg in tfdata.graphdict.keys_containing("azurerm_resource_group") {
                tfdata.graphdict.remove_edge(&rg, subnet);
            }
        }
    }
    Ok(())
}

/// Subnets contain the NICs and VMs that reference them.
pub fn handle_subnet(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let subnets = tfdata.graphdict.keys_containing("azurerm_subnet.");

    for subnet in &subnets {
        for node in tfdata.graphdict.keys_snapshot() {
            let node_type = ids::type_of(&node);
            if node_type != "azurerm_network_interface" && !is_vm(&node) {
                continue;
            }
            let references_subnet = tfdata.graphdict.has_edge(&node, subnet)
                || tfdata
                    .metadata_of(&node)
                    .and_then(|m| m.get("subnet_id"))
                    .map(|v| v.to_string())
                    .is_some_and(|v| v.contains(ids::strip_module(subnet)));
            if references_subnet {
                tfdata.graphdict.remove_edge(&node, subnet);
                tfdata.graphdict.add_edge(subnet, &node);
            }
        }
        // NICs collapse into the VM they attach to.
        let nics: Vec<String> = tfdata
            .graphdict
            .children(subnet)
            .iter()
            .filter(|c| c.contains("azurerm_network_interface"))
            .cloned()
            .collect();
        for nic in nics {
            let vms: Vec<String> = tfdata
                .graphdict
                .parents_of(&nic)
                .into_iter()
                .filter(|p| p.contains("virtual_machine"))
                .collect();
            for vm in vms {
                tfdata.graphdict.remove_edge(&vm, &nic);
                tfdata.graphdict.add_edge(subnet, &vm);
                tfdata.graphdict.remove_edge(subnet, &nic);
                tfdata.graphdict.remove_node_and_refs(&nic);
                tfdata.meta_data.remove(&nic);
            }
        }
    }
    Ok(())
}

/// Network security groups re-wrap the members of associated subnets.
///
/// Association resources (`azurerm_subnet_network_security_group_association`)
/// bind an NSG to a subnet; the NSG then becomes a container between the
/// subnet and its non-group members, and the association disappears.
pub fn handle_nsg(tfdata: &mut TfData, ctx: &ProviderContext) -> Result<()> {
    let associations = tfdata
        .graphdict
        .keys_containing("azurerm_subnet_network_security_group_association");

    for association in associations {
        let connections = tfdata.graphdict.children(&association).to_vec();
        let text = meta_text(tfdata, &association);

        let (found_nsg, found_subnet) = {
            let find = |pattern: &str| -> Option<String> {
                connections
                    .iter()
                    .find(|c| c.contains(pattern))
                    .cloned()
                    .or_else(|| {
                        tfdata
                            .graphdict
                            .keys_containing(pattern)
                            .into_iter()
                            .find(|c| text.contains(ids::strip_module(c)))
                    })
            };
            (
                find("azurerm_network_security_group."),
                find("azurerm_subnet."),
            )
        };
        let Some(nsg) = found_nsg else {
            continue;
        };
        let Some(subnet) = found_subnet else {
            continue;
        };

        // Subnet members move inside the NSG container.
        let members: Vec<String> = tfdata
            .graphdict
            .children(&subnet)
            .iter()
            .filter(|m| !ctx.is_group_node(m) && *m != &nsg)
            .cloned()
            .collect();
        for member in &members {
            tfdata.graphdict.remove_edge(&subnet, member);
            tfdata.graphdict.add_edge(&nsg, member);
        }
        tfdata.graphdict.add_edge(&subnet, &nsg);

        tfdata.graphdict.remove_node_and_refs(&association);
        tfdata.meta_data.remove(&association);
    }

    // NSG rules are bookkeeping, not boxes.
    for rule in tfdata.graphdict.keys_containing("azurerm_network_security_rule") {
        tfdata.graphdict.remove_node_and_refs(&rule);
        tfdata.meta_data.remove(&rule);
    }
    Ok(())
}

/// VM scale sets: expand across referenced subnets, place unexpanded
/// sets into the subnet their network profile names, and wire load
/// balancers to the sets whose backend pools they feed.
pub fn handle_vmss(tfdata: &mut TfData, ctx: &ProviderContext) -> Result<()> {
    transforms::expand_to_numbered_instances(
        tfdata,
        ctx,
        "virtual_machine_scale_set",
        "subnet_id",
        true,
    );

    let vmss_list: Vec<String> = tfdata
        .graphdict
        .keys_containing("virtual_machine_scale_set")
        .into_iter()
        .filter(|v| !v.contains('~'))
        .collect();
    if vmss_list.is_empty() {
        return Ok(());
    }
    let subnets = subnet_keys(tfdata);
    let load_balancers: Vec<String> = tfdata
        .graphdict
        .keys_containing("azurerm_lb")
        .into_iter()
        .filter(|l| !l.contains("association") && !l.contains("probe") && !l.contains("rule"))
        .collect();

    for vmss in &vmss_list {
        let profile = tfdata
            .metadata_of(vmss)
            .and_then(|m| m.get("network_profile"))
            .map(|v| v.to_string())
            .unwrap_or_default();

        for subnet in &subnets {
            if profile.contains(ids::strip_module(subnet))
                || profile.contains(ids::name_of(subnet))
            {
                tfdata.graphdict.add_edge(subnet, vmss);
                break;
            }
        }

        let backend = tfdata
            .metadata_of(vmss)
            .and_then(|m| m.get("load_balancer_backend_address_pool_ids"))
            .map(|v| v.to_string())
            .unwrap_or_default();
        for lb in &load_balancers {
            if backend.contains(ids::strip_module(lb)) || backend.contains(ids::name_of(lb)) {
                tfdata.graphdict.add_edge(lb, vmss);
            }
        }
    }
    Ok(())
}

/// Application gateways sit in the subnet their gateway IP
/// configuration names and point at the VMs and scale sets referenced
/// by their backend address pools.
pub fn handle_app_gateway(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let gateways = tfdata
        .graphdict
        .keys_containing("azurerm_application_gateway");
    if gateways.is_empty() {
        return Ok(());
    }
    let subnets = subnet_keys(tfdata);

    for gateway in &gateways {
        let Some(meta) = tfdata.metadata_of(gateway).cloned() else {
            continue;
        };

        let ip_config = meta
            .get("gateway_ip_configuration")
            .map(|v| v.to_string())
            .unwrap_or_default();
        for subnet in &subnets {
            if ip_config.contains(ids::strip_module(subnet))
                || ip_config.contains(ids::name_of(subnet))
            {
                // The gateway typically owns its subnet outright.
                tfdata.graphdict.add_edge(subnet, gateway);
                break;
            }
        }

        let backend = meta
            .get("backend_address_pool")
            .map(|v| v.to_string())
            .unwrap_or_default();
        if backend.is_empty() {
            continue;
        }
        for node in tfdata.graphdict.keys_snapshot() {
            let is_backend = is_vm(&node) || node.contains("virtual_machine_scale_set");
            if !is_backend {
                continue;
            }
            if backend.contains(ids::strip_module(&node)) || backend.contains(ids::name_of(&node))
            {
                tfdata.graphdict.add_edge(gateway, &node);
            }
        }
    }
    Ok(())
}

/// Place VMs in the subnet holding their NIC (post-expansion: numbered
/// VMs and NICs exist by now), and drop base NICs that were replaced by
/// numbered clones.
pub fn place_vms_in_subnets(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let subnets = subnet_keys(tfdata);
    let vms: Vec<String> = tfdata
        .graphdict
        .keys_snapshot()
        .into_iter()
        .filter(|n| is_vm(n))
        .collect();

    for subnet in &subnets {
        let subnet_nics: Vec<String> = tfdata
            .graphdict
            .children(subnet)
            .iter()
            .filter(|c| c.contains("azurerm_network_interface") && !c.contains("association"))
            .cloned()
            .collect();

        for vm in &vms {
            let nic_refs = tfdata
                .metadata_of(vm)
                .and_then(|m| m.get("network_interface_ids"))
                .map(|v| v.to_string())
                .unwrap_or_default();
            let attached = subnet_nics.iter().any(|nic| {
                nic_refs.contains(ids::strip_module(ids::strip_suffix(nic)))
                    || tfdata.graphdict.has_edge(vm, nic)
            });
            if attached {
                tfdata.graphdict.add_edge(subnet, vm);
            }
        }

        // A base NIC superseded by numbered clones leaves the subnet.
        let stale: Vec<String> = tfdata
            .graphdict
            .children(subnet)
            .iter()
            .filter(|c| {
                c.contains("azurerm_network_interface")
                    && !c.contains('~')
                    && !c.contains("association")
                    && tfdata
                        .graphdict
                        .nodes()
                        .any(|k| ids::strip_suffix(k) == c.as_str() && k.contains('~'))
            })
            .cloned()
            .collect();
        for nic in stale {
            tfdata.graphdict.remove_edge(subnet, &nic);
        }
    }
    Ok(())
}

/// Resolve a `zone` attribute for one numbered instance, reducing
/// `count.index` arithmetic against the clone's own number.
fn resolve_zone(zone: &str, node: &str) -> String {
    let mut text = zone.trim_matches('"').trim_matches('\'').to_string();
    if text.contains("count.index") {
        if let Some(suffix) = ids::suffix_of(node) {
            text = text.replace("count.index", &suffix.saturating_sub(1).to_string());
        }
    }
    text = text
        .replace("${", "")
        .replace('}', "")
        .replace("tostring(", "")
        .replace(')', "");
    if text.chars().any(|c| "+-*/".contains(c)) {
        if let Ok(value) = postfix::evaluate(&text) {
            return value.to_string();
        }
    }
    text.trim().to_string()
}

/// Wrap numbered VM instances in per-zone `tv_azurerm_zone.*`
/// containers inside their subnet (post-expansion).
pub fn create_vm_zone_containers(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let subnets = subnet_keys(tfdata);

    for subnet in &subnets {
        let zoned: Vec<String> = tfdata
            .graphdict
            .children(subnet)
            .iter()
            .filter(|c| is_vm(c) && c.contains('~'))
            .cloned()
            .collect();

        for vm in zoned {
            let zone = tfdata
                .metadata_of(&vm)
                .and_then(|m| m.get("zone"))
                .map(|v| v.to_string())
                .unwrap_or_default();
            if zone.is_empty() {
                continue;
            }
            let zone_id = resolve_zone(&zone, &vm);
            let zone_node = format!("tv_azurerm_zone.zone{zone_id}");

            if !tfdata.graphdict.contains(&zone_node) {
                tfdata.graphdict.add_node(zone_node.clone());
                let meta = tfdata.meta_data.entry(zone_node.clone()).or_default();
                meta.insert("zone_id".to_string(), AttrValue::from(zone_id.clone()));
                meta.insert("type".to_string(), AttrValue::from("tv_azurerm_zone"));
            }
            tfdata.graphdict.remove_edge(subnet, &vm);
            tfdata.graphdict.add_edge(&zone_node, &vm);
            tfdata.graphdict.add_edge(subnet, &zone_node);
        }
    }
    Ok(())
}

/// Wrap numbered zonal resources (scale sets, AKS node pools) in
/// per-zone containers, one zone per clone in `zones` order
/// (post-expansion).
pub fn create_zone_containers(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let numbered: Vec<String> = tfdata
        .graphdict
        .keys_snapshot()
        .into_iter()
        .filter(|k| k.contains('~') && ZONAL_TYPES.iter().any(|t| k.contains(t)))
        .collect();
    if numbered.is_empty() {
        return Ok(());
    }
    let subnets = subnet_keys(tfdata);

    for instance in numbered {
        let base = ids::strip_suffix(&instance).to_string();
        let Some(suffix) = ids::suffix_of(&instance).filter(|s| *s >= 1) else {
            continue;
        };
        let zones = tfdata
            .meta_data
            .get(&base)
            .or_else(|| tfdata.original_metadata.get(&base))
            .or_else(|| tfdata.meta_data.get(&instance))
            .and_then(|m| m.get("zones"))
            .cloned()
            .unwrap_or(AttrValue::Null);
        let mut zone_ids = Vec::new();
        zones.string_leaves(&mut zone_ids);
        let Some(zone_id) = zone_ids.get((suffix - 1) as usize) else {
            continue;
        };
        let zone_node = format!("tv_azurerm_zone.zone_{zone_id}");

        let parent_subnets: Vec<String> = subnets
            .iter()
            .filter(|s| tfdata.graphdict.has_edge(s, &instance))
            .cloned()
            .collect();
        if parent_subnets.is_empty() {
            continue;
        }

        if !tfdata.graphdict.contains(&zone_node) {
            tfdata.graphdict.add_node(zone_node.clone());
            let meta = tfdata.meta_data.entry(zone_node.clone()).or_default();
            meta.insert("zone_id".to_string(), AttrValue::from(zone_id.to_string()));
            meta.insert(
                "name".to_string(),
                AttrValue::from(format!("Availability Zone {zone_id}")),
            );
        }
        for subnet in parent_subnets {
            tfdata.graphdict.remove_edge(&subnet, &instance);
            tfdata.graphdict.add_edge(&zone_node, &instance);
            tfdata.graphdict.add_edge(&subnet, &zone_node);
        }
    }
    Ok(())
}

/// Connect load balancers straight to their backend VMs, bypassing the
/// backend-pool association plumbing (post-expansion).
///
/// The plan records LB -> association -> NIC -> VM; the diagram wants
/// LB -> VM, with the association resources gone.
pub fn connect_lb_to_backend_vms(tfdata: &mut TfData, _ctx: &ProviderContext) -> Result<()> {
    let load_balancers: Vec<String> = tfdata
        .graphdict
        .keys_containing("azurerm_lb")
        .into_iter()
        .filter(|l| {
            !l.contains("association") && !l.contains("probe") && !l.contains("rule")
        })
        .collect();
    let associations = tfdata
        .graphdict
        .keys_containing("azurerm_network_interface_backend_address_pool_association");

    for association in associations {
        let connections = tfdata.graphdict.children(&association).to_vec();
        let text = meta_text(tfdata, &association);

        let nics: Vec<String> = connections
            .iter()
            .filter(|c| {
                c.contains("azurerm_network_interface") && !c.contains("association")
            })
            .cloned()
            .collect();
        let lbs: Vec<String> = load_balancers
            .iter()
            .filter(|lb| {
                connections.iter().any(|c| c.contains(lb.as_str()))
                    || text.contains(ids::strip_module(lb))
                    || text.contains(ids::name_of(lb))
            })
            .cloned()
            .collect();

        for nic in &nics {
            // The VM owning this NIC, by edge or by metadata reference.
            let owners: Vec<String> = tfdata
                .graphdict
                .keys_snapshot()
                .into_iter()
                .filter(|vm| {
                    is_vm(vm)
                        && (tfdata.graphdict.has_edge(vm, nic)
                            || meta_text(tfdata, vm)
                                .contains(ids::strip_module(ids::strip_suffix(nic))))
                })
                .collect();
            for lb in &lbs {
                for vm in &owners {
                    tfdata.graphdict.add_edge(lb, vm);
                }
            }
        }

        tfdata.graphdict.remove_node_and_refs(&association);
        tfdata.meta_data.remove(&association);
    }
    Ok(())
}

/// Drop group-type nodes that ended up with no members (post-expansion
/// sweep).
pub fn remove_empty_groups(tfdata: &mut TfData, ctx: &ProviderContext) -> Result<()> {
    let empty: Vec<String> = tfdata
        .graphdict
        .keys_snapshot()
        .into_iter()
        .filter(|node| ctx.is_group_node(node) && tfdata.graphdict.children(node).is_empty())
        .collect();
    for group in empty {
        tracing::debug!(group = %group, "removing empty group");
        tfdata.graphdict.remove_node_and_refs(&group);
        tfdata.meta_data.remove(&group);
    }
    Ok(())
}
