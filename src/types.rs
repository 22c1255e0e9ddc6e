//! Core data types used throughout Terracarta.
//!
//! This module defines the fundamental data structures for representing:
//! - Heterogeneous resource attribute values (`AttrValue`)
//! - The pipeline state object (`TfData`)
//! - Provider detection results
//! - Output formats

use crate::graph::Graph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

/// Attribute map for a single resource node.
pub type Metadata = BTreeMap<String, AttrValue>;

/// Sentinel string for values the planner could not know.
pub const UNKNOWN: &str = "UNKNOWN";

/// Prefix of sentinel strings produced by failed function evaluation.
pub const ERROR_PREFIX: &str = "ERROR!";

/// A heterogeneous metadata value.
///
/// Planner output mixes strings, numbers, booleans, lists, and maps, and
/// some of them are stringified expressions that get rewritten during
/// evaluation. Sentinels (`UNKNOWN`, `ERROR!…`) are ordinary strings
/// recognized by [`AttrValue::is_sentinel`], so they survive round trips
/// through serialization unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// JSON null / absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String (including expression strings and sentinels)
    Str(String),
    /// Ordered list of values
    List(Vec<AttrValue>),
    /// Key-ordered map of values
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Borrow the string content, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, accepting strings that parse as integers.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Str(s) => s.trim().trim_matches('"').parse().ok(),
            _ => None,
        }
    }

    /// True for `UNKNOWN` and `ERROR!…` sentinel strings.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        match self {
            Self::Str(s) => s == UNKNOWN || s.starts_with(ERROR_PREFIX) || s.starts_with('$'),
            _ => false,
        }
    }

    /// True for empty strings, empty collections, and null.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Str(s) => s.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Collect every string leaf reachable from this value, in order.
    ///
    /// The relation enricher scans these for references to other nodes.
    pub fn string_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Str(s) => out.push(s),
            Self::List(items) => {
                for item in items {
                    item.string_leaves(out);
                }
            }
            Self::Map(map) => {
                for value in map.values() {
                    value.string_leaves(out);
                }
            }
            _ => {}
        }
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "None"),
            Self::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Self::Str(s) => write!(f, "\"{s}\"")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

/// Per-module symbol tables built by the loader and consumed by the
/// expression evaluator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTables {
    /// `variables[module][name] = value` after applying the precedence
    /// user tfvars > `TF_VAR_*` env > module arguments > defaults.
    pub variables: BTreeMap<String, BTreeMap<String, AttrValue>>,

    /// `locals[module][name] = value`, flattened from per-file blocks.
    pub locals: BTreeMap<String, BTreeMap<String, AttrValue>>,

    /// Module output values: `outputs[name] = value expression`.
    pub outputs: BTreeMap<String, AttrValue>,

    /// `module_sources[module] = source string` from module call blocks.
    pub module_sources: BTreeMap<String, String>,
}

impl SymbolTables {
    /// Look up a variable, falling back to the root module and then to a
    /// case-insensitive match (legacy tfvars files vary in casing).
    #[must_use]
    pub fn variable(&self, module: &str, name: &str) -> Option<&AttrValue> {
        if let Some(vars) = self.variables.get(module) {
            if let Some(value) = vars.get(name) {
                return Some(value);
            }
            let lowered = name.to_lowercase();
            if let Some((_, value)) = vars.iter().find(|(k, _)| k.to_lowercase() == lowered) {
                return Some(value);
            }
        }
        if module != "main" {
            return self.variable("main", name);
        }
        None
    }

    /// Look up a local value for a module.
    #[must_use]
    pub fn local(&self, module: &str, name: &str) -> Option<&AttrValue> {
        self.locals.get(module).and_then(|locals| locals.get(name))
    }
}

/// Result of cloud provider detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDetection {
    /// All detected providers, alphabetical.
    pub providers: Vec<String>,
    /// Provider contributing the most resources.
    pub primary_provider: String,
    /// Resource count per detected provider.
    pub resource_counts: BTreeMap<String, usize>,
    /// How the detection was made (`resource_prefix` or `default`).
    pub detection_method: String,
    /// Detection confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

/// User annotation document (Input D).
///
/// ```yaml
/// add:
///   custom_ops.dashboard:
///     label: Ops
/// connect:
///   aws_lambda_function.worker:
///     - aws_sns_topic.alerts: "notifies"
/// disconnect:
///   aws_subnet.*:
///     - aws_cloudwatch_log_group.logs
/// remove:
///   - aws_sns_topic.alerts
/// update:
///   aws_vpc.main:
///     label: Main VPC
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotations {
    /// Nodes to create, with their metadata.
    pub add: BTreeMap<String, Metadata>,
    /// Edges to add; values are bare targets or `{target: label}` maps.
    pub connect: BTreeMap<String, Vec<ConnectTarget>>,
    /// Edges to remove; wildcard sources supported.
    pub disconnect: BTreeMap<String, Vec<String>>,
    /// Nodes to delete; wildcards supported.
    pub remove: Vec<String>,
    /// Metadata to merge into existing nodes; wildcards supported.
    pub update: BTreeMap<String, Metadata>,
}

impl Annotations {
    /// True when no section contains anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.connect.is_empty()
            && self.disconnect.is_empty()
            && self.remove.is_empty()
            && self.update.is_empty()
    }
}

/// A `connect` entry: either a bare destination or a `{dst: label}` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectTarget {
    /// Destination without a label
    Plain(String),
    /// Destination with an edge label
    Labeled(BTreeMap<String, String>),
}

impl ConnectTarget {
    /// The destination node identifier.
    #[must_use]
    pub fn destination(&self) -> &str {
        match self {
            Self::Plain(dst) => dst,
            Self::Labeled(map) => map.keys().next().map_or("", String::as_str),
        }
    }

    /// The edge label, when present.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Labeled(map) => map.values().next().map(String::as_str),
        }
    }
}

/// The pipeline state object.
///
/// Every pipeline pass takes a `TfData` and transforms it in place. The
/// serialized form is the value consumed by the external renderer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfData {
    /// Adjacency map: resource identifier to ordered children.
    pub graphdict: Graph,

    /// Per-node attribute maps.
    pub meta_data: BTreeMap<String, Metadata>,

    /// Provider detection result (absent until C3 has run).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_detection: Option<ProviderDetection>,

    /// Nodes eliminated because their evaluated `count` is 0 or failed.
    pub hidden: BTreeSet<String>,

    /// Pristine snapshot of the base graph, taken at the end of C4.
    pub original_graphdict: Graph,

    /// Pristine snapshot of the base metadata, taken at the end of C4.
    pub original_metadata: BTreeMap<String, Metadata>,

    /// Deduplicated node identifiers from the planner, in plan order.
    #[serde(default)]
    pub node_list: Vec<String>,

    /// Symbol tables for the expression evaluator.
    #[serde(skip)]
    pub symbols: SymbolTables,

    /// User annotation overrides.
    #[serde(skip)]
    pub annotations: Annotations,
}

impl TfData {
    /// Metadata lookup that understands `~k` clone suffixes: a clone
    /// falls back to its base identifier's entry.
    #[must_use]
    pub fn metadata_of(&self, node: &str) -> Option<&Metadata> {
        if let Some(meta) = self.meta_data.get(node) {
            return Some(meta);
        }
        let base = crate::graph::ids::strip_suffix(node);
        self.meta_data.get(base)
    }

    /// Evaluated `count` of a node, when it is an integer.
    #[must_use]
    pub fn count_of(&self, node: &str) -> Option<i64> {
        self.metadata_of(node)
            .and_then(|meta| meta.get("count"))
            .and_then(AttrValue::as_int)
    }

    /// Serialize to the output JSON document, pretty-printed with sorted
    /// keys (determinism comes from the B-tree containers).
    pub fn to_output_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Output formats supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// The TfData JSON document
    Json,
    /// Graphviz DOT (debug rendering of the graphdict)
    Dot,
    /// Mermaid flowchart (debug rendering of the graphdict)
    Mermaid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_attr_value_untagged_roundtrip() {
        let json = r#"{"cidr_block": "10.0.0.0/16", "count": 2, "tags": {"Name": "main"}, "subnet_ids": ["a", "b"]}"#;
        let meta: Metadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta["count"], AttrValue::Int(2));
        assert_eq!(meta["cidr_block"].as_str(), Some("10.0.0.0/16"));
        assert!(matches!(meta["tags"], AttrValue::Map(_)));
        assert!(matches!(meta["subnet_ids"], AttrValue::List(_)));
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(AttrValue::Str(UNKNOWN.into()).is_sentinel());
        assert!(AttrValue::Str("ERROR!_length([])".into()).is_sentinel());
        assert!(!AttrValue::Str("aws_vpc.main".into()).is_sentinel());
        assert!(!AttrValue::Int(0).is_sentinel());
    }

    #[test]
    fn test_string_leaves_walks_nested_values() {
        let mut tags = BTreeMap::new();
        tags.insert("Name".to_string(), AttrValue::from("web"));
        let value = AttrValue::List(vec![
            AttrValue::from("aws_subnet.a"),
            AttrValue::Map(tags),
        ]);
        let mut leaves = Vec::new();
        value.string_leaves(&mut leaves);
        assert_eq!(leaves, vec!["aws_subnet.a", "web"]);
    }

    #[test]
    fn test_variable_lookup_falls_back_to_main() {
        let mut symbols = SymbolTables::default();
        symbols
            .variables
            .entry("main".to_string())
            .or_default()
            .insert("region".to_string(), AttrValue::from("eu-west-1"));

        assert_eq!(
            symbols.variable("networking", "region").and_then(AttrValue::as_str),
            Some("eu-west-1")
        );
    }

    #[test]
    fn test_variable_lookup_case_insensitive() {
        let mut symbols = SymbolTables::default();
        symbols
            .variables
            .entry("main".to_string())
            .or_default()
            .insert("Region".to_string(), AttrValue::from("us-east-1"));

        assert!(symbols.variable("main", "region").is_some());
    }

    #[test]
    fn test_connect_target_label() {
        let yaml = r#"
connect:
  aws_lambda_function.worker:
    - aws_sns_topic.alerts: notifies
    - aws_sqs_queue.jobs
"#;
        let annotations: Annotations = serde_yaml::from_str(yaml).unwrap();
        let targets = &annotations.connect["aws_lambda_function.worker"];
        assert_eq!(targets[0].destination(), "aws_sns_topic.alerts");
        assert_eq!(targets[0].label(), Some("notifies"));
        assert_eq!(targets[1].destination(), "aws_sqs_queue.jobs");
        assert_eq!(targets[1].label(), None);
    }
}
