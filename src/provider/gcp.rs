//! GCP rule tables.
//!
//! Drawing hierarchy: project > network > region > subnetwork > zone >
//! resources. Regions and zones are synthetic `tv_gcp_*` nodes.

use super::context::{
    Arrow, AutoAnnotation, ConsolidationRule, MultiInstancePattern, ProviderContext, VariantRule,
};
use super::ProviderKind;
use crate::handlers::{gcp as handlers, HandlerSpec, Op};

const PREFIXES: &[&str] = &["google_"];

const GROUP_NODES: &[&str] = &[
    "tv_gcp_account",
    "google_project",
    "tv_gcp_users",
    "tv_gcp_system",
    "tv_gcp_infra_system2",
    "tv_gcp_onprem",
    "tv_gcp_external_saas",
    "tv_gcp_external_data",
    "tv_gcp_external_3p",
    "tv_gcp_region",
    "tv_gcp_zone",
    "tv_gcp_load_balancer",
    "google_compute_network",
    "google_compute_subnetwork",
];

const EDGE_NODES: &[&str] = &[
    "google_dns_managed_zone",
    "google_compute_global_forwarding_rule",
    "google_cdn_backend_bucket",
    "google_compute_vpn_gateway",
];

const OUTER_NODES: &[&str] = &["tv_gcp_users", "tv_gcp_users_icon", "tv_gcp_internet"];

const REVERSE_ARROW_LIST: &[&str] = &[
    "google_dns_managed_zone",
    "google_compute_network.",
    "google_compute_subnetwork.",
    "google_compute_firewall.",
];

const FORCED_DEST: &[&str] = &[
    "google_sql_database_instance",
    "google_compute_instance.",
    "google_storage_bucket",
];

const FORCED_ORIGIN: &[&str] = &["google_dns_managed_zone"];

const IMPLIED_CONNECTIONS: &[(&str, &str)] = &[
    ("kms_key_name", "google_kms_crypto_key"),
    ("service_account", "google_service_account"),
];

const SHARED_SERVICES: &[&str] = &[
    "google_kms_key_ring",
    "google_logging_project_sink",
    "google_monitoring_dashboard",
    "google_container_registry",
    "google_secret_manager_secret",
];

const ALWAYS_DRAW_LINE: &[&str] = &[
    "google_compute_forwarding_rule",
    "google_compute_backend_service",
    "google_container_node_pool",
    "google_compute_instance_group",
];

const NEVER_DRAW_LINE: &[&str] = &[];

const DISCONNECT_LIST: &[&str] = &[];

const NAME_REPLACEMENTS: &[(&str, &str)] = &[
    ("compute_instance", "Compute Engine"),
    ("compute_network", "VPC Network"),
    ("compute_subnetwork", "Subnet"),
    ("container_cluster", "GKE Cluster"),
    ("sql_database_instance", "Cloud SQL"),
    ("storage_bucket", "Cloud Storage"),
    ("this", ""),
];

fn consolidations() -> Vec<ConsolidationRule> {
    let rule = |prefix, resource_name, edge_service| ConsolidationRule {
        prefix,
        resource_name,
        edge_service,
    };
    vec![
        rule("google_compute_firewall", "google_compute_firewall.firewall", false),
        rule("google_compute_address", "google_compute_address.external_ip", false),
        rule("google_dns_record_set", "google_dns_managed_zone.dns", true),
        rule("google_kms", "google_kms_key_ring.kms", false),
        rule("google_logging", "google_logging_project_sink.logging", false),
    ]
}

fn auto_annotations() -> Vec<AutoAnnotation> {
    vec![
        AutoAnnotation {
            prefix: "google_dns_managed_zone",
            links: &["tv_gcp_users_icon.users"],
            arrow: Arrow::Reverse,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "google_compute_vpn_gateway",
            links: &["tv_gcp_onprem.corporate_datacenter"],
            arrow: Arrow::Forward,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "google_compute_global_forwarding_rule",
            links: &["tv_gcp_internet.internet"],
            arrow: Arrow::Reverse,
            delete: &[],
        },
    ]
}

fn node_variants() -> Vec<VariantRule> {
    vec![
        VariantRule {
            resource_type: "google_compute_instance",
            keywords: &[("n1", "google_compute_instance_n1"), ("n2", "google_compute_instance_n2")],
        },
        VariantRule {
            resource_type: "google_sql_database_instance",
            keywords: &[("mysql", "google_sql_mysql"), ("postgres", "google_sql_postgres")],
        },
    ]
}

fn multi_instance_patterns() -> Vec<MultiInstancePattern> {
    vec![MultiInstancePattern {
        resource_types: &["google_compute_instance_group_manager"],
        trigger_attributes: &["distribution_policy_zones"],
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
        HandlerSpec::before(
            "google_compute_subnetwork",
            handlers::prepare_region_metadata,
            vec![Op::InsertIntermediateNode {
                parent_pattern: "google_compute_network".to_string(),
                child_pattern: "google_compute_subnetwork".to_string(),
                generator: "generate_region_node_name",
                create_if_missing: true,
            }],
        ),
        HandlerSpec::imperative(
            "google_compute_instance_group_manager",
            handlers::link_instance_groups_to_zones,
        ),
        HandlerSpec::ops(
            "google_",
            vec![Op::GroupSharedServices {
                group_name: "gcp_group.shared_services".to_string(),
            }],
        ),
        HandlerSpec::imperative(
            "google_compute_forwarding_rule",
            handlers::group_load_balancer_components,
        ),
        HandlerSpec::imperative(
            "google_compute_backend_service",
            handlers::group_load_balancer_components,
        ),
        HandlerSpec::imperative("google_container_cluster", handlers::handle_gke),
    ]
}

/// Build the GCP provider context.
#[must_use]
pub fn context() -> ProviderContext {
    ProviderContext {
        kind: ProviderKind::Gcp,
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
        generators: vec![
            ("generate_region_node_name", handlers::generate_region_node_name),
            ("generate_zone_node_name", handlers::generate_zone_node_name),
        ],
        post_expand: Vec::new(),
    }
}
