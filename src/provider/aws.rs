//! AWS rule tables.
//!
//! Drawing hierarchy: VPC > availability zone > subnet > resources.

use super::context::{
    Arrow, AutoAnnotation, ConsolidationRule, MultiInstancePattern, ProviderContext, VariantRule,
};
use super::ProviderKind;
use crate::handlers::{aws as handlers, HandlerSpec, Op};

const PREFIXES: &[&str] = &["aws_"];

const GROUP_NODES: &[&str] = &[
    "aws_vpc",
    "aws_az",
    "aws_group",
    "aws_account",
    "aws_appautoscaling_target",
    "aws_autoscaling_group",
    "aws_subnet",
    "aws_security_group",
    "tv_aws_onprem",
    "tv_aws_region",
];

const EDGE_NODES: &[&str] = &[
    "aws_route53",
    "aws_cloudfront_distribution",
    "aws_internet_gateway",
    "aws_api_gateway",
    "aws_apigateway",
    "aws_cloudwatch_event",
    "aws_sns_topic",
    "aws_cognito",
    "aws_wafv2",
    "aws_waf",
    "aws_appsync",
];

const OUTER_NODES: &[&str] = &[
    "tv_aws_users",
    "tv_aws_internet",
    "tv_aws_device",
    "tv_aws_onprem",
    "tv_aws_mobile_client",
];

const REVERSE_ARROW_LIST: &[&str] = &[
    "aws_route53",
    "aws_cloudfront",
    "aws_cloudwatch_event",
    "aws_sfn_state_machine",
    "aws_vpc.",
    "aws_subnet.",
    "aws_appautoscaling_target",
    "aws_iam_role.",
    "aws_rds_aurora",
];

const FORCED_DEST: &[&str] = &["aws_rds", "aws_instance", "aws_elasticache"];

const FORCED_ORIGIN: &[&str] = &[
    "aws_route53",
    "aws_cloudfront_distribution",
    "aws_cloudwatch_event",
    "aws_sns_topic",
    "aws_sfn_state_machine",
    "aws_s3_bucket_notification",
    "aws_wafv2_web_acl",
    "aws_waf_web_acl",
];

const IMPLIED_CONNECTIONS: &[(&str, &str)] = &[
    ("certificate_arn", "aws_acm_certificate"),
    ("container_definitions", "aws_ecr_repository"),
];

const SHARED_SERVICES: &[&str] = &[
    "aws_acm_certificate",
    "aws_cloudwatch_log_group",
    "aws_ecr_repository",
    "aws_efs_file_system",
    "aws_ssm_parameter",
    "aws_kms_key",
    "aws_eip",
];

const ALWAYS_DRAW_LINE: &[&str] = &[
    "aws_lb",
    "aws_iam_role",
    "aws_volume_attachment",
    "aws_alb",
    "aws_nlb",
    "aws_efs_mount_target",
    "aws_ecs_service",
    "aws_rds_aurora",
    "aws_rds_mysql",
    "aws_rds_postgres",
];

const NEVER_DRAW_LINE: &[&str] = &[];

const DISCONNECT_LIST: &[&str] = &[];

const NAME_REPLACEMENTS: &[(&str, &str)] = &[
    ("az", "Availability Zone"),
    ("alb", "App Load Balancer"),
    ("appautoscaling_target", "Auto Scaling"),
    ("route_table_association", "Route Table"),
    ("ecs_service_fargate", "Fargate"),
    ("eip", "Elastic IP"),
    ("instance", "EC2"),
    ("lambda_function", "Lambda"),
    ("iam_role", "Role"),
    ("dx", "Direct Connect"),
    ("cloudfront_distribution", "Cloudfront"),
    ("iam_policy", "policy"),
    ("this", ""),
];

fn consolidations() -> Vec<ConsolidationRule> {
    let rule = |prefix, resource_name, edge_service| ConsolidationRule {
        prefix,
        resource_name,
        edge_service,
    };
    vec![
        rule("aws_route53", "aws_route53_record.route_53", true),
        rule("aws_cloudwatch_log", "aws_cloudwatch_log_group.cloudwatch", false),
        rule("aws_cloudwatch_event", "aws_cloudwatch_event_rule.eventbridge", true),
        rule("aws_sns_topic", "aws_sns_topic.sns", true),
        rule("aws_api_gateway", "aws_api_gateway_integration.gateway", false),
        rule("aws_acm", "aws_acm_certificate.acm", false),
        rule("aws_ssm_parameter", "aws_ssm_parameter.ssmparam", false),
        rule("aws_dx", "aws_dx_connection.directconnect", true),
        rule("aws_lb", "aws_lb.elb", false),
        rule("aws_ecs", "aws_ecs_service.ecs", false),
        rule("aws_internet_gateway", "aws_internet_gateway.igw", false),
        rule("aws_efs_file_system", "aws_efs_file_system.efs", false),
        rule("aws_kms", "aws_kms_key.kms", false),
        rule("aws_eip", "aws_eip.elastic_ip", false),
        rule("aws_autoscaling_policy", "aws_autoscaling_policy.autoscaling_policy", false),
        rule("aws_sagemaker_endpoint", "aws_sagemaker_endpoint.endpoint", false),
        rule("aws_appsync_graphql_api", "aws_appsync_graphql_api.graphql_api", true),
        rule("aws_cognito", "aws_cognito_user_pool.cognito", true),
        rule("aws_wafv2", "aws_wafv2_web_acl.waf", true),
        rule("aws_waf", "aws_waf_web_acl.waf", true),
    ]
}

fn auto_annotations() -> Vec<AutoAnnotation> {
    vec![
        AutoAnnotation {
            prefix: "aws_route53",
            links: &["tv_aws_users.users"],
            arrow: Arrow::Reverse,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_cloudfront_distribution",
            links: &["tv_aws_users.users"],
            arrow: Arrow::Reverse,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_dx",
            links: &["tv_aws_onprem.corporate_datacenter", "tv_aws_cgw.customer_gateway"],
            arrow: Arrow::Forward,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_internet_gateway",
            links: &["tv_aws_internet.internet"],
            arrow: Arrow::Forward,
            delete: &["aws_nat_gateway."],
        },
        AutoAnnotation {
            prefix: "aws_eks_cluster",
            links: &["aws_eks_service.eks"],
            arrow: Arrow::Reverse,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_nat_gateway",
            links: &["aws_internet_gateway.*"],
            arrow: Arrow::Forward,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_ecs_service",
            links: &["aws_ecr_repository.ecr"],
            arrow: Arrow::Forward,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_eks_cluster",
            links: &["aws_ecr_repository.ecr"],
            arrow: Arrow::Forward,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_api_gateway",
            links: &["tv_aws_mobile_client.mobile"],
            arrow: Arrow::Reverse,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_ecs_",
            links: &["aws_ecs_cluster.ecs"],
            arrow: Arrow::Forward,
            delete: &[],
        },
        AutoAnnotation {
            prefix: "aws_lambda",
            links: &["aws_cloudwatch_log_group.cloudwatch"],
            arrow: Arrow::Forward,
            delete: &[],
        },
    ]
}

fn node_variants() -> Vec<VariantRule> {
    vec![
        VariantRule {
            resource_type: "aws_ecs_service",
            keywords: &[("FARGATE", "aws_fargate"), ("EC2", "aws_ec2ecs")],
        },
        VariantRule {
            resource_type: "aws_eks_cluster",
            keywords: &[("compute_config", "aws_eks_cluster_auto")],
        },
        VariantRule {
            resource_type: "aws_lb",
            keywords: &[("application", "aws_alb"), ("network", "aws_nlb")],
        },
        VariantRule {
            resource_type: "aws_rds",
            keywords: &[
                ("aurora", "aws_rds_aurora"),
                ("mysql", "aws_rds_mysql"),
                ("postgres", "aws_rds_postgres"),
            ],
        },
    ]
}

fn multi_instance_patterns() -> Vec<MultiInstancePattern> {
    vec![
        MultiInstancePattern {
            resource_types: &["aws_lb", "aws_alb", "aws_nlb"],
            trigger_attributes: &["subnets"],
            also_expand_attributes: &["security_groups"],
        },
        MultiInstancePattern {
            resource_types: &["aws_ecs_service"],
            trigger_attributes: &["subnets"],
            also_expand_attributes: &["security_groups"],
        },
        MultiInstancePattern {
            resource_types: &["aws_autoscaling_group"],
            trigger_attributes: &["vpc_zone_identifier"],
            also_expand_attributes: &[],
        },
    ]
}

fn special_resources() -> Vec<HandlerSpec> {
    vec![
        HandlerSpec::ops(
            "aws_eks_node_group",
            vec![Op::ExpandToNumberedInstances {
                resource_pattern: "aws_eks_node_group".to_string(),
                subnet_key: "subnet_ids".to_string(),
                skip_if_numbered: true,
            }],
        ),
        HandlerSpec::ops(
            "aws_eks_fargate_profile",
            vec![Op::ExpandToNumberedInstances {
                resource_pattern: "aws_eks_fargate_profile".to_string(),
                subnet_key: "subnet_ids".to_string(),
                skip_if_numbered: true,
            }],
        ),
        HandlerSpec::ops(
            "aws_autoscaling_group",
            vec![Op::ExpandToNumberedInstances {
                resource_pattern: "aws_autoscaling_group".to_string(),
                subnet_key: "vpc_zone_identifier".to_string(),
                skip_if_numbered: true,
            }],
        ),
        HandlerSpec::ops(
            "random_string",
            vec![Op::DeleteNodes {
                resource_pattern: "random_string.".to_string(),
                remove_from_parents: true,
            }],
        ),
        HandlerSpec::before(
            "aws_vpc_endpoint",
            handlers::handle_vpc_endpoints,
            vec![Op::MoveToParent {
                resource_pattern: "aws_vpc_endpoint".to_string(),
                from_parent_pattern: "aws_subnet".to_string(),
                to_parent_pattern: "aws_vpc.".to_string(),
            }],
        ),
        HandlerSpec::imperative("aws_db_subnet_group", handlers::handle_db_subnet_group),
        HandlerSpec::ops(
            "aws_",
            vec![Op::GroupSharedServices {
                group_name: "aws_group.shared_services".to_string(),
            }],
        ),
        HandlerSpec {
            pattern: "aws_cloudfront_distribution",
            ops: vec![Op::LinkViaSharedChild {
                source_pattern: "aws_cloudfront".to_string(),
                target_pattern: "aws_lb".to_string(),
                remove_intermediate: false,
            }],
            imperative: Some(handlers::handle_cloudfront_origins),
            order: crate::handlers::HandlerOrder::After,
        },
        HandlerSpec::before(
            "aws_subnet",
            handlers::prepare_subnet_az_metadata,
            vec![Op::InsertIntermediateNode {
                parent_pattern: "aws_vpc".to_string(),
                child_pattern: "aws_subnet".to_string(),
                generator: "generate_az_node_name",
                create_if_missing: true,
            }],
        ),
        HandlerSpec::imperative("aws_appautoscaling_target", handlers::handle_autoscaling),
        HandlerSpec::ops(
            "aws_efs_file_system",
            vec![Op::BidirectionalLink {
                source_pattern: "aws_efs_mount_target".to_string(),
                target_pattern: "aws_efs_file_system".to_string(),
                cleanup_reverse: true,
            }],
        ),
        // Load balancers and ECS services expand across subnets first;
        // the security-group wrap then boxes each replica.
        HandlerSpec::imperative("aws_lb", handlers::handle_load_balancer),
        HandlerSpec::imperative("aws_ecs", handlers::handle_ecs),
        HandlerSpec::imperative("aws_security_group", handlers::handle_security_groups),
        HandlerSpec::imperative("aws_eks", handlers::handle_eks),
        HandlerSpec::imperative("helm_release", handlers::handle_helm_release),
        HandlerSpec::ops(
            "aws_lambda_event_source_mapping",
            vec![Op::LinkPeersViaIntermediary {
                intermediary_pattern: "aws_lambda_event_source_mapping".to_string(),
                source_pattern: "aws_sqs_queue".to_string(),
                target_pattern: "aws_lambda_function".to_string(),
            }],
        ),
        HandlerSpec::imperative("aws_wafv2_web_acl_association", handlers::handle_waf_associations),
    ]
}

/// Build the AWS provider context.
#[must_use]
pub fn context() -> ProviderContext {
    ProviderContext {
        kind: ProviderKind::Aws,
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
        generators: vec![("generate_az_node_name", handlers::generate_az_node_name)],
        post_expand: Vec::new(),
    }
}
