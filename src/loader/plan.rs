//! Planner document parsing (Inputs A and B).
//!
//! Input A is the JSON emitted by `<planner> show -json <plan>`: a list
//! of resource changes with before/after attribute maps. Input B is the
//! planner's low-level dependency graph piped through
//! `dot -Txdot_json`: numbered node objects plus head/tail edge pairs.

use crate::error::{Result, TerracartaError};
use crate::types::Metadata;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Input A: the planner's resource-change document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanDocument {
    /// Every resource the plan would create or change.
    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,
}

/// One entry in `resource_changes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceChange {
    /// Full address, e.g. `module.net.aws_subnet.public[0]`.
    pub address: String,

    /// `managed` or `data`.
    #[serde(default)]
    pub mode: Option<String>,

    /// Resource type, e.g. `aws_subnet`.
    #[serde(rename = "type", default)]
    pub resource_type: String,

    /// The change body.
    #[serde(default)]
    pub change: Change,
}

/// Planned attribute values for one resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Change {
    /// Known post-apply values.
    #[serde(default)]
    pub after: Metadata,

    /// Attributes whose values are not known until apply.
    #[serde(default)]
    pub after_unknown: Metadata,

    /// Attributes redacted as sensitive.
    #[serde(default)]
    pub after_sensitive: Metadata,
}

impl Change {
    /// Merge the three attribute maps, with `after` values winning over
    /// unknown and sensitive markers.
    #[must_use]
    pub fn merged(&self) -> Metadata {
        let mut merged = self.after_sensitive.clone();
        for (k, v) in &self.after_unknown {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.after {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

/// Input B: the low-level dependency graph in xdot JSON form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanGraph {
    /// Graph nodes; `_gvid` indexes into this list.
    #[serde(default)]
    pub objects: Vec<GraphObject>,

    /// Directed edges as `(head, tail)` id pairs.
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// A node of the low-level graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphObject {
    /// Positional id referenced by edges.
    #[serde(rename = "_gvid")]
    pub gvid: usize,

    /// The resource address, e.g. `aws_vpc.main`.
    #[serde(default)]
    pub label: Option<String>,
}

/// An edge of the low-level graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id.
    pub head: usize,

    /// Target node id.
    pub tail: usize,
}

/// Parse Input A from a JSON string.
pub fn parse_plan(json: &str, origin: &Path) -> Result<PlanDocument> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| TerracartaError::malformed_plan(origin, e.to_string()))?;
    if value.get("resource_changes").is_none() {
        return Err(TerracartaError::malformed_plan(
            origin,
            "document has no 'resource_changes' key",
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| TerracartaError::malformed_plan(origin, e.to_string()))
}

/// Parse Input B from a JSON string.
pub fn parse_plan_graph(json: &str, origin: &Path) -> Result<PlanGraph> {
    serde_json::from_str(json)
        .map_err(|e| TerracartaError::malformed_plan(origin, e.to_string()))
}

/// Read and parse Input A from disk.
pub async fn load_plan(path: &Path) -> Result<PlanDocument> {
    let json = read_input(path).await?;
    parse_plan(&json, path)
}

/// Read and parse Input B from disk.
pub async fn load_plan_graph(path: &Path) -> Result<PlanGraph> {
    let json = read_input(path).await?;
    parse_plan_graph(&json, path)
}

async fn read_input(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(TerracartaError::InputNotFound { path: path.to_path_buf() });
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TerracartaError::io(path, e))
}
