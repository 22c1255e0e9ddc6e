//! End-to-end pipeline tests.
//!
//! Each scenario feeds planner documents straight into the compiler and
//! checks the shape of the resulting graph document.

use std::path::Path;
use terracarta::loader::plan::{parse_plan, parse_plan_graph};
use terracarta::{Annotations, Compiler, Config, LoadedInputs, TfData};

fn compile(plan_json: &str, graph_json: &str) -> TfData {
    compile_with(plan_json, graph_json, Annotations::default())
}

fn compile_with(plan_json: &str, graph_json: &str, annotations: Annotations) -> TfData {
    let inputs = LoadedInputs {
        plan: parse_plan(plan_json, Path::new("tfplan.json")).unwrap(),
        plan_graph: parse_plan_graph(graph_json, Path::new("tfgraph.json")).unwrap(),
        annotations,
        ..LoadedInputs::default()
    };
    Compiler::new(Config::default()).compile(inputs).unwrap()
}

fn resource(address: &str, rtype: &str, after: &str) -> String {
    format!(
        r#"{{"address": "{address}", "mode": "managed", "type": "{rtype}",
            "change": {{"after": {after}, "after_unknown": {{}}, "after_sensitive": {{}}}}}}"#
    )
}

fn plan(resources: &[String]) -> String {
    format!(r#"{{"resource_changes": [{}]}}"#, resources.join(","))
}

const EMPTY_GRAPH: &str = r#"{"objects": [], "edges": []}"#;

// =========================================================================
// Boundary behaviors
// =========================================================================

#[test]
fn empty_plan_gives_empty_graph_and_aws_default() {
    let tfdata = compile(r#"{"resource_changes": []}"#, EMPTY_GRAPH);
    assert!(tfdata.graphdict.is_empty());
    let detection = tfdata.provider_detection.unwrap();
    assert_eq!(detection.primary_provider, "aws");
    assert!(detection.confidence < 0.5);
}

#[test]
fn zero_count_resource_is_hidden() {
    let tfdata = compile(
        &plan(&[resource("aws_instance.web", "aws_instance", r#"{"count": 0}"#)]),
        EMPTY_GRAPH,
    );
    assert!(tfdata.hidden.contains("aws_instance.web"));
    assert!(!tfdata.graphdict.contains("aws_instance.web"));
    // Metadata survives for bookkeeping lookups.
    assert!(tfdata.meta_data.contains_key("aws_instance.web"));
}

#[test]
fn count_one_never_gets_a_suffix() {
    let tfdata = compile(
        &plan(&[resource("aws_instance.web", "aws_instance", r#"{"count": 1}"#)]),
        EMPTY_GRAPH,
    );
    assert!(tfdata.graphdict.contains("aws_instance.web"));
    assert!(!tfdata.graphdict.contains("aws_instance.web~1"));
}

#[test]
fn count_n_gives_exactly_n_clones() {
    let tfdata = compile(
        &plan(&[resource("aws_nat_gateway.nat", "aws_nat_gateway", r#"{"count": 3}"#)]),
        EMPTY_GRAPH,
    );
    for i in 1..=3 {
        assert!(tfdata.graphdict.contains(&format!("aws_nat_gateway.nat~{i}")));
    }
    assert!(!tfdata.graphdict.contains("aws_nat_gateway.nat"));
    assert!(!tfdata.graphdict.contains("aws_nat_gateway.nat~4"));
}

#[test]
fn identical_input_gives_byte_identical_output() {
    let build = || {
        compile(
            &plan(&[
                resource("aws_vpc.main", "aws_vpc", r#"{"cidr_block": "10.0.0.0/16"}"#),
                resource(
                    "aws_subnet.a",
                    "aws_subnet",
                    r#"{"cidr_block": "10.0.1.0/24", "availability_zone": "us-east-1a"}"#,
                ),
                resource("aws_instance.web", "aws_instance", r#"{"subnet_id": "${aws_subnet.a.id}"}"#),
            ]),
            EMPTY_GRAPH,
        )
    };
    let one = build().to_output_json().unwrap();
    let two = build().to_output_json().unwrap();
    assert_eq!(one, two);
}

#[test]
fn output_invariants_hold() {
    let tfdata = compile(
        &plan(&[
            resource("aws_vpc.main", "aws_vpc", r#"{"cidr_block": "10.0.0.0/16"}"#),
            resource(
                "aws_subnet.a",
                "aws_subnet",
                r#"{"cidr_block": "10.0.1.0/24", "availability_zone": "us-east-1a"}"#,
            ),
        ]),
        EMPTY_GRAPH,
    );
    let problems = Compiler::new(Config::default()).validate(&tfdata);
    assert!(problems.is_empty(), "unexpected violations: {problems:?}");
    // Required metadata keys on every node.
    for (node, _) in tfdata.graphdict.iter() {
        let meta = &tfdata.meta_data[node];
        for key in ["name", "type", "provider"] {
            assert!(meta.contains_key(key), "{node} missing {key}");
        }
    }
}

// =========================================================================
// Scenario: subnet -> availability zone insertion
// =========================================================================

#[test]
fn subnets_move_under_availability_zones() {
    let tfdata = compile(
        &plan(&[
            resource("aws_vpc.main", "aws_vpc", r#"{"cidr_block": "10.0.0.0/16"}"#),
            resource(
                "aws_subnet.a",
                "aws_subnet",
                r#"{"cidr_block": "10.0.1.0/24", "availability_zone": "us-east-1a"}"#,
            ),
            resource(
                "aws_subnet.b",
                "aws_subnet",
                r#"{"cidr_block": "10.0.2.0/24", "availability_zone": "us-east-1b"}"#,
            ),
        ]),
        EMPTY_GRAPH,
    );

    let vpc_children = tfdata.graphdict.children("aws_vpc.main");
    let az_a = "aws_az.availability_zone_us_east_1a~1";
    let az_b = "aws_az.availability_zone_us_east_1b~2";

    assert!(vpc_children.contains(&az_a.to_string()), "vpc: {vpc_children:?}");
    assert!(vpc_children.contains(&az_b.to_string()));
    // No subnet sits directly inside the VPC.
    assert!(vpc_children.iter().all(|c| !c.starts_with("aws_subnet")));
    assert_eq!(tfdata.graphdict.children(az_a), ["aws_subnet.a"]);
    assert_eq!(tfdata.graphdict.children(az_b), ["aws_subnet.b"]);
}

// =========================================================================
// Scenario: multi-AZ application load balancer
// =========================================================================

#[test]
fn multi_az_alb_consolidates_and_replicates() {
    let tfdata = compile(
        &plan(&[
            resource("aws_vpc.main", "aws_vpc", r#"{"cidr_block": "10.0.0.0/16"}"#),
            resource(
                "aws_subnet.a",
                "aws_subnet",
                r#"{"cidr_block": "10.0.1.0/24", "availability_zone": "us-east-1a"}"#,
            ),
            resource(
                "aws_subnet.b",
                "aws_subnet",
                r#"{"cidr_block": "10.0.2.0/24", "availability_zone": "us-east-1b"}"#,
            ),
            resource(
                "aws_lb.web",
                "aws_lb",
                r#"{"load_balancer_type": "application",
                    "subnets": ["${aws_subnet.a.id}", "${aws_subnet.b.id}"],
                    "security_groups": ["${aws_security_group.lb_a.id}", "${aws_security_group.lb_b.id}"]}"#,
            ),
            resource("aws_security_group.lb_a", "aws_security_group", "{}"),
            resource("aws_security_group.lb_b", "aws_security_group", "{}"),
        ]),
        EMPTY_GRAPH,
    );

    // Consolidated service node with the variant recorded.
    assert!(tfdata.graphdict.contains("aws_lb.elb"));
    assert_eq!(
        tfdata.meta_data["aws_lb.elb"]["variant"].as_str(),
        Some("aws_alb")
    );

    // One replica per subnet, each boxed by its numbered security group.
    assert_eq!(
        tfdata.graphdict.children("aws_security_group.lb_a~1"),
        ["aws_lb.web~1"]
    );
    assert_eq!(
        tfdata.graphdict.children("aws_security_group.lb_a~2"),
        ["aws_lb.web~2"]
    );
    assert!(tfdata
        .graphdict
        .children("aws_subnet.a")
        .iter()
        .any(|c| c.starts_with("aws_security_group.") && c.ends_with("~1")));
    assert!(tfdata
        .graphdict
        .children("aws_subnet.b")
        .iter()
        .any(|c| c.starts_with("aws_security_group.") && c.ends_with("~2")));
    // The consolidated node drives the replicas.
    assert!(tfdata
        .graphdict
        .children("aws_lb.elb")
        .contains(&"aws_lb.web~1".to_string()));
}

// =========================================================================
// Scenario: SQS -> Lambda via event source mapping
// =========================================================================

#[test]
fn event_source_mapping_flattens_to_direct_edge() {
    let graph_json = r#"{
        "objects": [
            {"_gvid": 0, "label": "aws_lambda_event_source_mapping.m"},
            {"_gvid": 1, "label": "aws_sqs_queue.jobs"},
            {"_gvid": 2, "label": "aws_lambda_function.worker"}
        ],
        "edges": [
            {"head": 0, "tail": 1},
            {"head": 0, "tail": 2}
        ]
    }"#;
    let tfdata = compile(
        &plan(&[
            resource("aws_sqs_queue.jobs", "aws_sqs_queue", "{}"),
            resource("aws_lambda_function.worker", "aws_lambda_function", "{}"),
            resource(
                "aws_lambda_event_source_mapping.m",
                "aws_lambda_event_source_mapping",
                r#"{"event_source_arn": "${aws_sqs_queue.jobs.arn}", "function_name": "${aws_lambda_function.worker.arn}"}"#,
            ),
        ]),
        graph_json,
    );

    assert!(!tfdata.graphdict.contains("aws_lambda_event_source_mapping.m"));
    assert!(tfdata
        .graphdict
        .children("aws_sqs_queue.jobs")
        .contains(&"aws_lambda_function.worker".to_string()));
}

// =========================================================================
// Scenario: Karpenter-only EKS cluster
// =========================================================================

#[test]
fn karpenter_only_eks_expands_per_subnet() {
    let graph_json = r#"{
        "objects": [
            {"_gvid": 0, "label": "aws_eks_cluster.main"},
            {"_gvid": 1, "label": "aws_subnet.private_a"},
            {"_gvid": 2, "label": "aws_subnet.private_b"},
            {"_gvid": 3, "label": "aws_subnet.private_c"}
        ],
        "edges": [
            {"head": 0, "tail": 1},
            {"head": 0, "tail": 2},
            {"head": 0, "tail": 3}
        ]
    }"#;
    let tfdata = compile(
        &plan(&[
            resource("aws_eks_cluster.main", "aws_eks_cluster", "{}"),
            resource(
                "aws_subnet.private_a",
                "aws_subnet",
                r#"{"availability_zone": "us-east-1a"}"#,
            ),
            resource(
                "aws_subnet.private_b",
                "aws_subnet",
                r#"{"availability_zone": "us-east-1b"}"#,
            ),
            resource(
                "aws_subnet.private_c",
                "aws_subnet",
                r#"{"availability_zone": "us-east-1c"}"#,
            ),
            resource("helm_release.karpenter", "helm_release", r#"{"chart": "karpenter"}"#),
        ]),
        graph_json,
    );

    // Three cluster replicas, one per private subnet.
    for (i, subnet) in ["aws_subnet.private_a", "aws_subnet.private_b", "aws_subnet.private_c"]
        .iter()
        .enumerate()
    {
        let clone = format!("aws_eks_cluster.main~{}", i + 1);
        assert!(
            tfdata.graphdict.children(subnet).contains(&clone),
            "{subnet} should hold {clone}: {:?}",
            tfdata.graphdict.children(subnet)
        );
    }
    // Three Karpenter replicas alongside them.
    for i in 1..=3 {
        assert!(tfdata
            .graphdict
            .contains(&format!("tv_karpenter.karpenter~{i}")));
    }
    // Control-plane group holds the base cluster, which holds the clones.
    assert!(tfdata
        .graphdict
        .children("aws_account.eks_control_plane_main")
        .contains(&"aws_eks_cluster.main".to_string()));
    for i in 1..=3 {
        assert!(tfdata
            .graphdict
            .children("aws_eks_cluster.main")
            .contains(&format!("aws_eks_cluster.main~{i}")));
    }
}

// =========================================================================
// Scenario: cycle breaking
// =========================================================================

#[test]
fn two_resource_cycle_breaks_deterministically() {
    let tfdata = compile(
        &plan(&[
            resource(
                "aws_lambda_function.a",
                "aws_lambda_function",
                r#"{"environment": "${aws_lambda_function.b.arn}"}"#,
            ),
            resource(
                "aws_lambda_function.b",
                "aws_lambda_function",
                r#"{"environment": "${aws_lambda_function.a.arn}"}"#,
            ),
        ]),
        EMPTY_GRAPH,
    );

    let forward = tfdata
        .graphdict
        .has_edge("aws_lambda_function.a", "aws_lambda_function.b");
    let backward = tfdata
        .graphdict
        .has_edge("aws_lambda_function.b", "aws_lambda_function.a");
    assert!(forward ^ backward, "exactly one direction must survive");

    // Deterministic across runs.
    let again = compile(
        &plan(&[
            resource(
                "aws_lambda_function.a",
                "aws_lambda_function",
                r#"{"environment": "${aws_lambda_function.b.arn}"}"#,
            ),
            resource(
                "aws_lambda_function.b",
                "aws_lambda_function",
                r#"{"environment": "${aws_lambda_function.a.arn}"}"#,
            ),
        ]),
        EMPTY_GRAPH,
    );
    assert_eq!(tfdata.graphdict, again.graphdict);
}

// =========================================================================
// Scenario: user annotation override
// =========================================================================

#[test]
fn user_annotations_remove_and_add_nodes() {
    let annotations: Annotations = serde_yaml::from_str(
        r#"
remove:
  - aws_sns_topic.alerts
add:
  custom_ops.dashboard:
    label: Ops
"#,
    )
    .unwrap();

    let tfdata = compile_with(
        &plan(&[
            resource("aws_sns_topic.alerts", "aws_sns_topic", "{}"),
            resource("aws_instance.web", "aws_instance", "{}"),
        ]),
        EMPTY_GRAPH,
        annotations,
    );

    assert!(!tfdata.graphdict.contains("aws_sns_topic.alerts"));
    // Consolidation ran before the override, so the removal follows the
    // topic into its canonical node.
    assert!(!tfdata.graphdict.contains("aws_sns_topic.sns"));
    assert!(tfdata.graphdict.contains("custom_ops.dashboard"));
    assert_eq!(
        tfdata.meta_data["custom_ops.dashboard"]["label"].as_str(),
        Some("Ops")
    );
}

// =========================================================================
// Round-trip and idempotence
// =========================================================================

#[test]
fn output_document_revalidates_after_json_round_trip() {
    let tfdata = compile(
        &plan(&[
            resource("aws_vpc.main", "aws_vpc", r#"{"cidr_block": "10.0.0.0/16"}"#),
            resource(
                "aws_subnet.a",
                "aws_subnet",
                r#"{"cidr_block": "10.0.1.0/24", "availability_zone": "us-east-1a"}"#,
            ),
        ]),
        EMPTY_GRAPH,
    );
    let json = tfdata.to_output_json().unwrap();
    let reloaded: TfData = serde_json::from_str(&json).unwrap();
    assert_eq!(reloaded.graphdict, tfdata.graphdict);
    let problems = Compiler::new(Config::default()).validate(&reloaded);
    assert!(problems.is_empty(), "{problems:?}");
}

#[test]
fn variable_driven_count_expansion() {
    let mut inputs = LoadedInputs {
        plan: parse_plan(
            &plan(&[resource(
                "aws_instance.web",
                "aws_instance",
                r#"{"count": "${var.replicas}"}"#,
            )]),
            Path::new("tfplan.json"),
        )
        .unwrap(),
        plan_graph: parse_plan_graph(EMPTY_GRAPH, Path::new("tfgraph.json")).unwrap(),
        ..LoadedInputs::default()
    };
    inputs
        .symbols
        .variables
        .entry("main".to_string())
        .or_default()
        .insert("replicas".to_string(), terracarta::AttrValue::Int(2));

    let tfdata = Compiler::new(Config::default()).compile(inputs).unwrap();
    assert!(tfdata.graphdict.contains("aws_instance.web~1"));
    assert!(tfdata.graphdict.contains("aws_instance.web~2"));
}

#[test]
fn unresolved_variable_aborts_compilation() {
    let inputs = LoadedInputs {
        plan: parse_plan(
            &plan(&[resource(
                "aws_instance.web",
                "aws_instance",
                r#"{"count": "${var.missing}"}"#,
            )]),
            Path::new("tfplan.json"),
        )
        .unwrap(),
        plan_graph: parse_plan_graph(EMPTY_GRAPH, Path::new("tfgraph.json")).unwrap(),
        ..LoadedInputs::default()
    };
    let result = Compiler::new(Config::default()).compile(inputs);
    assert!(matches!(
        result,
        Err(terracarta::TerracartaError::UnresolvedVariable { ref variable, .. })
            if variable == "missing"
    ));
}
