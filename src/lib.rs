//! # Terracarta
//!
//! A Terraform/OpenTofu plan-to-architecture-diagram graph compiler.
//!
//! Terracarta takes the output of the planner (`terraform show -json`
//! plus `terraform graph | dot -Txdot_json`) together with the HCL
//! sources, and compiles a normalized, semantically enriched resource
//! graph ready to be drawn by a renderer: a `graphdict` adjacency map
//! with per-node metadata, provider detection, and clone bookkeeping.
//!
//! ## Pipeline
//!
//! The core is a unidirectional pipeline over a single [`TfData`] state
//! object:
//!
//! 1. metadata builder (planner resources -> node list + metadata)
//! 2. provider detection and rule-table loading
//! 3. base graph from the planner's low-level edges
//! 4. expression evaluation (variables, locals, functions, counts)
//! 5. relation enrichment, consolidation, annotations
//! 6. per-resource-type handlers (AZ insertion, SG wrapping, LB/EKS
//!    topologies, shared services, …)
//! 7. variant selection and multi-instance expansion
//! 8. cleanup: edge reversal, cycle breaking, deterministic sorting
//!
//! ## Example
//!
//! ```rust,no_run
//! use terracarta::{Compiler, Config, LoadOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = LoadOptions {
//!         plan_path: "tfplan.json".into(),
//!         graph_path: "tfgraph.json".into(),
//!         ..LoadOptions::default()
//!     };
//!     let compiler = Compiler::new(Config::default());
//!     let tfdata = compiler.compile_paths(&options).await?;
//!     println!("{}", tfdata.to_output_json()?);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all, rust_2018_idioms)]

pub mod cli;
pub mod config;
pub mod error;
pub mod eval;
pub mod graph;
pub mod handlers;
pub mod loader;
pub mod provider;
pub mod types;
pub mod workspace;

pub use config::Config;
pub use error::{Result, TerracartaError};
pub use loader::{LoadOptions, LoadedInputs};
pub use types::{Annotations, AttrValue, OutputFormat, ProviderDetection, TfData};
pub use workspace::Workspace;

/// The pipeline orchestrator and primary library entry point.
///
/// A `Compiler` loads the planner documents and source files, then runs
/// the transformation pipeline to completion. The pipeline itself is
/// synchronous and performs no I/O; only loading is async.
pub struct Compiler {
    config: Config,
}

impl Compiler {
    /// Create a compiler with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Load every input named in `options` and compile it.
    ///
    /// A scratch [`Workspace`] exists for the duration of the call and
    /// is removed on return.
    ///
    /// # Errors
    ///
    /// Returns an error when an input is missing or malformed, or when
    /// a variable cannot be resolved.
    pub async fn compile_paths(&self, options: &LoadOptions) -> Result<TfData> {
        let workspace = Workspace::create()?;
        tracing::debug!(workspace = %workspace.path().display(), "compiling plan");

        let mut load_options = options.clone();
        load_options.config = self.config.clone();
        let inputs = loader::load(&load_options).await?;
        self.compile(inputs)
    }

    /// Run the pipeline on already-loaded inputs.
    ///
    /// # Errors
    ///
    /// Returns an error when variable resolution fails or a handler's
    /// prerequisite resource is absent.
    pub fn compile(&self, inputs: LoadedInputs) -> Result<TfData> {
        let plan_graph = inputs.plan_graph.clone();

        // C2: flatten the planner output.
        let mut tfdata = loader::build_tfdata(inputs);

        // C3: classify providers, load the rule tables.
        let detection = provider::detect(&tfdata.node_list);
        let ctx = provider::context_for(&detection);
        tfdata.provider_detection = Some(detection);

        // C4: base graph plus pristine snapshots.
        graph::builder::build(&mut tfdata, &plan_graph, &ctx)?;

        // C1: resolve expressions and counts; hide zero-count nodes.
        eval::run(&mut tfdata)?;

        // C5-C10 in fixed order.
        graph::enrich::run(&mut tfdata, &ctx);
        graph::consolidate::run(&mut tfdata, &ctx);
        graph::annotations::run(&mut tfdata, &ctx);
        handlers::run(&mut tfdata, &ctx)?;
        graph::variants::run(&mut tfdata, &ctx);
        graph::expand::run(&mut tfdata, &ctx);

        // Post-expansion matching: these need the numbered clones.
        for handler in &ctx.post_expand {
            handler(&mut tfdata, &ctx)?;
        }

        // C11: finalize.
        graph::cleanup::run(&mut tfdata, &ctx);

        tracing::info!(
            nodes = tfdata.graphdict.len(),
            hidden = tfdata.hidden.len(),
            "pipeline complete"
        );
        Ok(tfdata)
    }

    /// Run the validation checks on a compiled (or reloaded) document.
    #[must_use]
    pub fn validate(&self, tfdata: &TfData) -> Vec<TerracartaError> {
        let detection = tfdata
            .provider_detection
            .clone()
            .unwrap_or_else(|| provider::detect(&tfdata.node_list));
        let ctx = provider::context_for(&detection);
        graph::cleanup::validate(tfdata, &ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_creation() {
        let _compiler = Compiler::new(Config::default());
    }

    #[test]
    fn test_empty_inputs_compile_to_empty_graph() {
        let compiler = Compiler::new(Config::default());
        let tfdata = compiler.compile(LoadedInputs::default()).unwrap();
        assert!(tfdata.graphdict.is_empty());
        let detection = tfdata.provider_detection.unwrap();
        assert_eq!(detection.primary_provider, "aws");
        assert!(detection.confidence < 0.5);
    }
}
