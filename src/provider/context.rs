//! Provider rule tables.
//!
//! A [`ProviderContext`] bundles every table the pipeline consults when
//! reshaping the graph for one cloud. The tables are language-neutral
//! data; the per-provider modules ([`super::aws`], [`super::azure`],
//! [`super::gcp`]) fill them in. Contexts are built once per run and
//! treated as immutable.

use crate::graph::ids;
use crate::handlers::{GeneratorFn, HandlerFn, HandlerSpec};
use crate::types::Metadata;
use super::ProviderKind;

/// Direction of an automatic annotation edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrow {
    /// `node -> target`
    Forward,
    /// `target -> node`
    Reverse,
}

/// One family-prefix consolidation rule.
#[derive(Debug, Clone)]
pub struct ConsolidationRule {
    /// Type prefix that triggers consolidation, e.g. `aws_route53`.
    pub prefix: &'static str,
    /// Canonical node the family collapses into.
    pub resource_name: &'static str,
    /// Whether the canonical node sits at the cloud edge when drawn.
    pub edge_service: bool,
}

/// One automatic annotation rule.
#[derive(Debug, Clone)]
pub struct AutoAnnotation {
    /// Node prefix the rule applies to.
    pub prefix: &'static str,
    /// Targets to link; a `.*` suffix means "any existing node with this
    /// type, else a synthetic `<type>.this`".
    pub links: &'static [&'static str],
    /// Edge direction.
    pub arrow: Arrow,
    /// Competing connection prefixes to remove from the node.
    pub delete: &'static [&'static str],
}

/// Keyword-driven variant mapping for one resource type.
#[derive(Debug, Clone)]
pub struct VariantRule {
    /// Resource type the rule applies to.
    pub resource_type: &'static str,
    /// `(metadata keyword, replacement type)` pairs, first match wins.
    pub keywords: &'static [(&'static str, &'static str)],
}

/// Multi-subnet expansion pattern.
#[derive(Debug, Clone)]
pub struct MultiInstancePattern {
    /// Resource types the pattern covers.
    pub resource_types: &'static [&'static str],
    /// Attributes whose subnet references trigger expansion.
    pub trigger_attributes: &'static [&'static str],
    /// Attributes holding companion resources that expand alongside.
    pub also_expand_attributes: &'static [&'static str],
}

/// The complete rule set for one provider.
pub struct ProviderContext {
    /// Which provider these tables describe.
    pub kind: ProviderKind,
    /// Resource-type prefixes owned by the provider.
    pub prefixes: &'static [&'static str],
    /// Family-prefix consolidations.
    pub consolidated_nodes: Vec<ConsolidationRule>,
    /// Types whose edges mean containment.
    pub group_nodes: &'static [&'static str],
    /// Types drawn inside the cloud but outside VPC-level containers.
    pub edge_nodes: &'static [&'static str],
    /// Synthetic types drawn outside the cloud boundary.
    pub outer_nodes: &'static [&'static str],
    /// Automatic annotation rules.
    pub auto_annotations: Vec<AutoAnnotation>,
    /// Keyword-driven type variants.
    pub node_variants: Vec<VariantRule>,
    /// Types whose edges flip direction; earlier entries are more
    /// "outer" and win ties.
    pub reverse_arrow_list: &'static [&'static str],
    /// Types only ever valid as an edge destination.
    pub forced_dest: &'static [&'static str],
    /// Types only ever valid as an edge origin.
    pub forced_origin: &'static [&'static str],
    /// `(metadata keyword, implied target type)` pairs.
    pub implied_connections: &'static [(&'static str, &'static str)],
    /// Resource-handler table (stage C9).
    pub special_resources: Vec<HandlerSpec>,
    /// Types collected into the shared-services container.
    pub shared_services: &'static [&'static str],
    /// Types whose edges are always drawn even across containers.
    pub always_draw_line: &'static [&'static str],
    /// Type pairs never connected.
    pub never_draw_line: &'static [&'static str],
    /// Types disconnected from everything late in the pipeline.
    pub disconnect_list: &'static [&'static str],
    /// Raw-type to display-name replacements.
    pub name_replacements: &'static [(&'static str, &'static str)],
    /// Multi-subnet expansion patterns.
    pub multi_instance_patterns: Vec<MultiInstancePattern>,
    /// Generator registry for `insert_intermediate_node` ops.
    pub generators: Vec<(&'static str, GeneratorFn)>,
    /// Handlers that need numbered clones to exist: run between the
    /// multi-instance expansion and cleanup, in order (zone containers,
    /// backend matching, empty-group sweeps).
    pub post_expand: Vec<HandlerFn>,
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("kind", &self.kind)
            .field("consolidations", &self.consolidated_nodes.len())
            .field("handlers", &self.special_resources.len())
            .finish()
    }
}

impl ProviderContext {
    /// Identifier of the provider's shared-services container node.
    #[must_use]
    pub fn shared_group_id(&self) -> String {
        format!("{}_group.shared_services", self.kind.as_str())
    }

    /// Whether a resource identifier's type is a group (containment) node.
    #[must_use]
    pub fn is_group_node(&self, node: &str) -> bool {
        let node_type = ids::type_of(node);
        self.group_nodes.iter().any(|g| node_type == *g)
    }

    /// Whether a resource belongs to this provider's prefix family.
    #[must_use]
    pub fn owns(&self, node: &str) -> bool {
        let stripped = ids::strip_module(node);
        self.prefixes.iter().any(|p| stripped.starts_with(p))
            || stripped.starts_with("tv_")
    }

    /// Whether a type is one of the provider's shared services.
    #[must_use]
    pub fn is_shared_service(&self, node: &str) -> bool {
        let node_type = ids::type_of(node);
        self.shared_services.iter().any(|s| node_type.starts_with(s))
    }

    /// The canonical consolidated identifier for a resource, when its
    /// type prefix matches a consolidation rule.
    #[must_use]
    pub fn consolidated_for(&self, node: &str) -> Option<&ConsolidationRule> {
        let stripped = ids::strip_module(node);
        self.consolidated_nodes
            .iter()
            .find(|rule| stripped.starts_with(rule.prefix))
    }

    /// Whether the handler table names this type as specially handled.
    #[must_use]
    pub fn is_special_resource(&self, node: &str) -> bool {
        let node_type = ids::type_of(node);
        self.special_resources
            .iter()
            .any(|spec| node_type.contains(spec.pattern))
    }

    /// Whether the handler table names this *exact* type. The variant
    /// pass uses this narrower test so `aws_ecs_service` still gets its
    /// Fargate variant even though an `aws_ecs` handler exists.
    #[must_use]
    pub fn is_special_exact(&self, node: &str) -> bool {
        let node_type = ids::type_of(node);
        self.special_resources
            .iter()
            .any(|spec| node_type == spec.pattern)
    }

    /// Whether a type belongs to a family with its own handler,
    /// ignoring the catch-all provider-prefix patterns. Consolidation
    /// leaves these alone; their handlers reshape them instead.
    #[must_use]
    pub fn is_special_family(&self, node: &str) -> bool {
        let node_type = ids::type_of(node);
        self.special_resources.iter().any(|spec| {
            !self.prefixes.contains(&spec.pattern) && node_type.starts_with(spec.pattern)
        })
    }

    /// Position of the first reverse-arrow entry matching `text`, used
    /// both as a membership test and for tie-breaking (lower = more
    /// outer).
    #[must_use]
    pub fn reverse_arrow_rank(&self, text: &str) -> Option<usize> {
        self.reverse_arrow_list
            .iter()
            .position(|prefix| text.contains(prefix))
    }

    /// The variant type for a node, when a variant keyword appears in
    /// the string form of its metadata.
    #[must_use]
    pub fn check_variant(&self, node: &str, meta: &Metadata) -> Option<&'static str> {
        let stripped = ids::strip_module(node);
        let rule = self
            .node_variants
            .iter()
            .find(|rule| stripped.starts_with(rule.resource_type))?;
        let haystack = meta
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        for (keyword, replacement) in rule.keywords {
            if haystack.contains(&keyword.to_lowercase()) {
                return Some(replacement);
            }
        }
        None
    }

    /// The provider's subnet (or nearest equivalent) type prefix.
    #[must_use]
    pub fn subnet_type(&self) -> &'static str {
        match self.kind {
            ProviderKind::Aws => "aws_subnet",
            ProviderKind::Azure => "azurerm_subnet",
            ProviderKind::Gcp => "google_compute_subnetwork",
        }
    }

    /// The provider's top-level network container type prefix.
    #[must_use]
    pub fn network_type(&self) -> &'static str {
        match self.kind {
            ProviderKind::Aws => "aws_vpc",
            ProviderKind::Azure => "azurerm_virtual_network",
            ProviderKind::Gcp => "google_compute_network",
        }
    }

    /// Resolve a generator function by registry name.
    #[must_use]
    pub fn generator(&self, name: &str) -> Option<GeneratorFn> {
        self.generators
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| *f)
    }

    /// Human-readable label for a node, used by the debug exports and
    /// available to renderers. Applies the provider's display-name
    /// replacements and drops prefixes, suffixes, and placeholders.
    #[must_use]
    pub fn pretty_name(&self, node: &str) -> String {
        let stripped = ids::strip_module(node);
        if stripped.starts_with("null_") || stripped.starts_with("random") {
            return "Null".to_string();
        }
        let mut service = ids::type_of(stripped).to_string();
        for prefix in self.prefixes {
            service = service.trim_start_matches(prefix).to_string();
        }
        service = service
            .trim_start_matches("tv_")
            .trim_start_matches(&format!("{}_", self.kind.as_str()))
            .to_string();
        if let Some((_, replacement)) = self
            .name_replacements
            .iter()
            .find(|(raw, _)| *raw == service)
        {
            service = (*replacement).to_string();
        }
        let label = ids::name_of(stripped);
        let label = ids::strip_suffix(label);
        let label = if label == "this" || service.to_lowercase().replace(' ', "_") == label {
            String::new()
        } else {
            label.replace('_', " ")
        };
        let combined = format!("{label} {service}");
        combined.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::super::aws;
    use crate::types::AttrValue;

    #[test]
    fn test_group_node_membership() {
        let ctx = aws::context();
        assert!(ctx.is_group_node("aws_vpc.main"));
        assert!(ctx.is_group_node("aws_subnet.public~2"));
        assert!(!ctx.is_group_node("aws_instance.web"));
    }

    #[test]
    fn test_consolidation_lookup() {
        let ctx = aws::context();
        let rule = ctx.consolidated_for("aws_route53_zone.primary").unwrap();
        assert_eq!(rule.resource_name, "aws_route53_record.route_53");
        assert!(ctx.consolidated_for("aws_instance.web").is_none());
    }

    #[test]
    fn test_variant_detection() {
        let ctx = aws::context();
        let mut meta = crate::types::Metadata::new();
        meta.insert(
            "load_balancer_type".to_string(),
            AttrValue::from("application"),
        );
        assert_eq!(ctx.check_variant("aws_lb.web", &meta), Some("aws_alb"));

        meta.insert(
            "load_balancer_type".to_string(),
            AttrValue::from("network"),
        );
        assert_eq!(ctx.check_variant("aws_lb.web", &meta), Some("aws_nlb"));
    }

    #[test]
    fn test_reverse_arrow_rank_orders_outer_first(){
        let ctx = aws::context();
        let vpc = ctx.reverse_arrow_rank("aws_vpc.main").unwrap();
        let subnet = ctx.reverse_arrow_rank("aws_subnet.a").unwrap();
        assert!(vpc < subnet);
        assert!(ctx.reverse_arrow_rank("aws_instance.web").is_none());
    }

    #[test]
    fn test_generator_registry() {
        let ctx = aws::context();
        assert!(ctx.generator("generate_az_node_name").is_some());
        assert!(ctx.generator("missing").is_none());
    }

    #[test]
    fn test_pretty_name() {
        let ctx = aws::context();
        assert_eq!(ctx.pretty_name("aws_lambda_function.worker"), "worker Lambda");
        assert_eq!(ctx.pretty_name("null_resource.wait"), "Null");
        assert_eq!(ctx.pretty_name("aws_instance.this"), "EC2");
        assert_eq!(
            ctx.pretty_name("module.net.aws_subnet.public~2"),
            "public subnet"
        );
    }
}
