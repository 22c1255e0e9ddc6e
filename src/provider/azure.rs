//! Azure rule tables.
//!
//! Drawing hierarchy: resource group > virtual network > subnet >
//! resources, with network security groups re-wrapping subnet members.

use super::context::{
    Arrow, AutoAnnotation, ConsolidationRule, MultiInstancePattern, ProviderContext, VariantRule,
};
use super::ProviderKind;
use crate::handlers::{azure as handlers, HandlerSpec, Op};

const PREFIXES: &[&str] = &["azurerm_", "azuread_", "azurestack_", "azapi_"];

const GROUP_NODES: &[&str] = &[
    "azurerm_resource_group",
    "azurerm_virtual_network",
    "azurerm_subnet",
    "azurerm_network_security_group",
    "tv_azurerm_zone",
    "tv_azure_onprem",
];

const EDGE_NODES: &[&str] = &[
    "azurerm_dns_zone",
    "azurerm_cdn_profile",
    "azurerm_application_gateway",
    "azurerm_public_ip",
];

const OUTER_NODES: &[&str] = &["tv_azure_users", "tv_azure_internet", "tv_azure_onprem"];

const REVERSE_ARROW_LIST: &[&str] = &[
    "azurerm_dns_zone",
    "azurerm_virtual_network.",
    "azurerm_subnet.",
    "azurerm_resource_group.",
    "azurerm_network_security_group.",
];

const FORCED_DEST: &[&str] = &[
    "azurerm_sql_database",
    "azurerm_postgresql_server",
    "azurerm_mysql_server",
    "azurerm_virtual_machine",
];

const FORCED_ORIGIN: &[&str] = &["azurerm_dns_zone"];

const IMPLIED_CONNECTIONS: &[(&str, &str)] = &[
    ("key_vault_id", "azurerm_key_vault"),
    ("storage_account_id", "azurerm_storage_account"),
];

const SHARED_SERVICES: &[&str] = &[
    "azurerm_key_vault",
    "azurerm_monitor",
    "azurerm_log_analytics_workspace",
    "azurerm_container_registry",
    "azurerm_storage_account",
];

const ALWAYS_DRAW_LINE: &[&str] = &[
    "azurerm_load_balancer",
    "azurerm_application_gateway",
    "azurerm_lb",
];

const NEVER_DRAW_LINE: &[&str] = &[];

const DISCONNECT_LIST: &[&str] = &[];

const NAME_REPLACEMENTS: &[(&str, &str)] = &[
    ("virtual_machine", "VM"),
    ("virtual_network", "VNet"),
    ("network_security_group", "NSG"),
    ("resource_group", "Resource Group"),
    ("log_analytics_workspace", "Log Analytics"),
    ("this", ""),
];

fn consolidations() -> Vec<ConsolidationRule> {
    let rule = |prefix, resource_name, edge_service| ConsolidationRule {
        prefix,
        resource_name,
        edge_service,
    };
    vec![
        rule("azurerm_public_ip", "azurerm_public_ip.public_ip", false),
        rule("azurerm_dns", "azurerm_dns_zone.dns", true),
        rule("azurerm_monitor", "azurerm_monitor_diagnostic_setting.monitor", false),
        rule("azurerm_key_vault_secret", "azurerm_key_vault.vault", false),
    ]
}

fn auto_annotations() -> Vec<AutoAnnotation> {
    vec![
        AutoAnnotation {
            prefix: "azurerm_dns_zone",
            links: &["tv_azure_users.users"],
            arrow: Arrow::Reverse,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "azurerm_virtual_network_gateway",
            links: &["tv_azure_onprem.corporate_datacenter"],
            arrow: Arrow::Forward,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "azurerm_application_gateway",
            links: &["tv_azure_internet.internet"],
            arrow: Arrow::Reverse,
            delete: &[],
        },
    ]
}

fn node_variants() -> Vec<VariantRule> {
    vec![
        VariantRule {
            resource_type: "azurerm_virtual_machine",
            keywords: &[
                ("linux", "azurerm_linux_virtual_machine"),
                ("windows", "azurerm_windows_virtual_machine"),
            ],
        },
        VariantRule {
            resource_type: "azurerm_sql_database",
            keywords: &[
                ("basic", "azurerm_sql_database_basic"),
                ("standard", "azurerm_sql_database_standard"),
            ],
        },
    ]
}

fn multi_instance_patterns() -> Vec<MultiInstancePattern> {
    vec![MultiInstancePattern {
        resource_types: &["azurerm_linux_virtual_machine_scale_set", "azurerm_windows_virtual_machine_scale_set"],
        trigger_attributes: &["subnet_id"],
        also_expand_attributes: &[],
    }]
}

fn special_resources() -> Vec<HandlerSpec> {
    vec![
        HandlerSpec::ops(
            "random_string",
            vec![Op::DeleteNodes {
                resource_pattern: "random_string.".to_string(),
                remove_from_parents: true,
            }],
        ),
        HandlerSpec::imperative("azurerm_resource_group", handlers::handle_resource_group),
        HandlerSpec::imperative("azurerm_virtual_network", handlers::handle_virtual_network),
        HandlerSpec::imperative("azurerm_subnet", handlers::handle_subnet),
        HandlerSpec::imperative("azurerm_network_security_group", handlers::handle_nsg),
        HandlerSpec::imperative("virtual_machine_scale_set", handlers::handle_vmss),
        HandlerSpec::imperative("azurerm_application_gateway", handlers::handle_app_gateway),
        HandlerSpec::ops(
            "azurerm_",
            vec![Op::GroupSharedServices {
                group_name: "azure_group.shared_services".to_string(),
            }],
        ),
    ]
}

/// Build the Azure provider context.
#[must_use]
pub fn context() -> ProviderContext {
    ProviderContext {
        kind: ProviderKind::Azure,
        prefixes: PREFIXES,
        consolidated_nodes: consolidations(),
        group_nodes: GROUP_NODES,
        edge_nodes: EDGE_NODES,
        outer_nodes: OUTER_NODES,
        auto_annotations: auto_annotations(),
        node_variants: node_variants(),
        reverse_arrow_list: REVERSE_ARROW_LIST,
        forced_dest: FORCED_DEST,
        forced_origin: FORCED_ORIGIN,
        implied_connections: IMPLIED_CONNECTIONS,
        special_resources: special_resources(),
        shared_services: SHARED_SERVICES,
        always_draw_line: ALWAYS_DRAW_LINE,
        never_draw_line: NEVER_DRAW_LINE,
        disconnect_list: DISCONNECT_LIST,
        name_replacements: NAME_REPLACEMENTS,
        multi_instance_patterns: multi_instance_patterns(),
        generators: Vec::new(),
        // These need the numbered clones from the expansion pass.
        post_expand: vec![
            handlers::place_vms_in_subnets,
            handlers::create_vm_zone_containers,
            handlers::create_zone_containers,
            handlers::connect_lb_to_backend_vms,
            handlers::remove_empty_groups,
        ],
    }
}
