//! Input loading and the metadata builder (pipeline stage C2).
//!
//! All filesystem access for the core happens here: the planner JSON
//! (Input A), the low-level graph (Input B), HCL sources (Input C),
//! annotation YAML (Input D), and varfiles (Input E) are read once and
//! condensed into a [`LoadedInputs`] bundle. The pipeline proper never
//! touches the filesystem again.

pub mod plan;
pub mod source;

use crate::error::{Result, TerracartaError};
use crate::graph::ids;
use crate::types::{Annotations, AttrValue, Metadata, SymbolTables, TfData};
use plan::{PlanDocument, PlanGraph};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything the pipeline needs, fully parsed.
#[derive(Debug, Default)]
pub struct LoadedInputs {
    /// Planner resource changes (Input A).
    pub plan: PlanDocument,
    /// Planner low-level dependency graph (Input B).
    pub plan_graph: PlanGraph,
    /// Symbol tables built from sources, varfiles, and environment.
    pub symbols: SymbolTables,
    /// User annotation overrides (Input D), empty when not supplied.
    pub annotations: Annotations,
}

/// Options controlling what gets loaded.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Path to the planner JSON document.
    pub plan_path: PathBuf,
    /// Path to the xdot JSON graph.
    pub graph_path: PathBuf,
    /// Optional source directories to scan for declarations.
    pub source_dirs: Vec<PathBuf>,
    /// Optional `.tfvars` / `.tfvars.json` files, later files winning.
    pub varfiles: Vec<PathBuf>,
    /// Optional annotations YAML file.
    pub annotations_path: Option<PathBuf>,
    /// Runtime configuration (scan exclusions, error tolerance).
    pub config: crate::config::Config,
}

/// Load and parse every input named in `options`.
pub async fn load(options: &LoadOptions) -> Result<LoadedInputs> {
    let plan = plan::load_plan(&options.plan_path).await?;
    let plan_graph = plan::load_plan_graph(&options.graph_path).await?;

    let mut parsed = source::ParsedSource::default();
    for dir in &options.source_dirs {
        let one = source::parse_directory(dir, &options.config.scan).await?;
        parsed.merge(one);
    }

    let mut varfiles = Vec::new();
    for path in &options.varfiles {
        varfiles.push(source::parse_varfile(path).await?);
    }

    // TF_VAR_* is read exactly once, here.
    let env: BTreeMap<String, String> = std::env::vars()
        .filter(|(k, _)| k.starts_with("TF_VAR_"))
        .collect();
    let symbols = source::build_symbols(&parsed, &varfiles, &env);

    let annotations = match &options.annotations_path {
        Some(path) => load_annotations(path).await?,
        None => Annotations::default(),
    };

    Ok(LoadedInputs { plan, plan_graph, symbols, annotations })
}

/// Parse the annotations YAML document (Input D).
pub async fn load_annotations(path: &Path) -> Result<Annotations> {
    if !path.exists() {
        return Err(TerracartaError::InputNotFound { path: path.to_path_buf() });
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TerracartaError::io(path, e))?;
    serde_yaml::from_str(&content).map_err(|e| TerracartaError::AnnotationParse {
        file: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Build the initial pipeline state from loaded inputs (stage C2).
///
/// Flattens the planner's `resource_changes` into a deduplicated node
/// list plus per-node metadata:
///
/// - planner `name[i]` index notation becomes 1-based `name~<i+1>`,
/// - `change.after` / `after_unknown` / `after_sensitive` merge with
///   after-values winning,
/// - module-scoped addresses record their module name,
/// - data-mode resources are skipped (they are not created by the plan).
#[must_use]
pub fn build_tfdata(inputs: LoadedInputs) -> TfData {
    let mut tfdata = TfData {
        symbols: inputs.symbols,
        annotations: inputs.annotations,
        ..TfData::default()
    };

    // Count indexed planner entries per base id so clone bases keep an
    // accurate count for the expansion passes.
    let mut index_counts: BTreeMap<String, i64> = BTreeMap::new();

    for change in &inputs.plan.resource_changes {
        if change.mode.as_deref() == Some("data") {
            continue;
        }
        let normalized = ids::normalize_index(&change.address);
        let node = ids::strip_module(&normalized).to_string();

        let mut meta: Metadata = change.change.merged();
        if let Some(module) = ids::module_of(&change.address) {
            meta.insert("module".to_string(), AttrValue::from(module));
        } else {
            meta.insert("module".to_string(), AttrValue::from("main"));
        }

        if let Some(suffix) = ids::suffix_of(&node) {
            let base = ids::strip_suffix(&node).to_string();
            let seen = index_counts.entry(base.clone()).or_insert(0);
            *seen = (*seen).max(i64::from(suffix));
            // The base id keeps merged metadata so suffix-stripped
            // lookups resolve; its count tracks the clone population.
            let base_meta = tfdata.meta_data.entry(base).or_insert_with(|| meta.clone());
            base_meta.insert("count".to_string(), AttrValue::Int(*seen));
        }

        if !tfdata.node_list.contains(&node) {
            tfdata.node_list.push(node.clone());
        }
        tfdata.meta_data.insert(node, meta);
    }

    tracing::info!(
        resources = tfdata.node_list.len(),
        "metadata builder complete"
    );
    tfdata
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plan_from(json: &str) -> PlanDocument {
        plan::parse_plan(json, Path::new("tfplan.json")).unwrap()
    }

    #[test]
    fn test_build_tfdata_flattens_resources() {
        let plan = plan_from(
            r#"{
            "resource_changes": [
                {
                    "address": "aws_vpc.main",
                    "mode": "managed",
                    "type": "aws_vpc",
                    "change": {"after": {"cidr_block": "10.0.0.0/16"}, "after_unknown": {}, "after_sensitive": {}}
                },
                {
                    "address": "module.net.aws_subnet.public",
                    "mode": "managed",
                    "type": "aws_subnet",
                    "change": {"after": {"cidr_block": "10.0.1.0/24"}, "after_unknown": {}, "after_sensitive": {}}
                }
            ]
        }"#,
        );
        let tfdata = build_tfdata(LoadedInputs { plan, ..LoadedInputs::default() });

        assert_eq!(tfdata.node_list, vec!["aws_vpc.main", "aws_subnet.public"]);
        assert_eq!(
            tfdata.meta_data["aws_vpc.main"]["module"].as_str(),
            Some("main")
        );
        assert_eq!(
            tfdata.meta_data["aws_subnet.public"]["module"].as_str(),
            Some("net")
        );
    }

    #[test]
    fn test_indexed_entries_become_numbered_clones() {
        let plan = plan_from(
            r#"{
            "resource_changes": [
                {
                    "address": "aws_subnet.public[0]",
                    "type": "aws_subnet",
                    "change": {"after": {"cidr_block": "10.0.1.0/24"}, "after_unknown": {}, "after_sensitive": {}}
                },
                {
                    "address": "aws_subnet.public[1]",
                    "type": "aws_subnet",
                    "change": {"after": {"cidr_block": "10.0.2.0/24"}, "after_unknown": {}, "after_sensitive": {}}
                }
            ]
        }"#,
        );
        let tfdata = build_tfdata(LoadedInputs { plan, ..LoadedInputs::default() });

        assert_eq!(
            tfdata.node_list,
            vec!["aws_subnet.public~1", "aws_subnet.public~2"]
        );
        // The base id records the clone population for later passes.
        assert_eq!(tfdata.count_of("aws_subnet.public"), Some(2));
    }

    #[test]
    fn test_data_resources_are_skipped() {
        let plan = plan_from(
            r#"{
            "resource_changes": [
                {
                    "address": "data.aws_availability_zones.available",
                    "mode": "data",
                    "type": "aws_availability_zones",
                    "change": {"after": {}, "after_unknown": {}, "after_sensitive": {}}
                },
                {
                    "address": "aws_vpc.main",
                    "mode": "managed",
                    "type": "aws_vpc",
                    "change": {"after": {}, "after_unknown": {}, "after_sensitive": {}}
                }
            ]
        }"#,
        );
        let tfdata = build_tfdata(LoadedInputs { plan, ..LoadedInputs::default() });
        assert_eq!(tfdata.node_list, vec!["aws_vpc.main"]);
    }

    #[test]
    fn test_duplicate_addresses_dedupe() {
        let plan = plan_from(
            r#"{
            "resource_changes": [
                {"address": "aws_vpc.main", "type": "aws_vpc", "change": {"after": {}, "after_unknown": {}, "after_sensitive": {}}},
                {"address": "aws_vpc.main", "type": "aws_vpc", "change": {"after": {}, "after_unknown": {}, "after_sensitive": {}}}
            ]
        }"#,
        );
        let tfdata = build_tfdata(LoadedInputs { plan, ..LoadedInputs::default() });
        assert_eq!(tfdata.node_list.len(), 1);
    }
}
