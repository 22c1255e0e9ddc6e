//! Command-line interface module.
//!
//! # Commands
//!
//! - `graph`: compile a plan into the enriched graph document
//! - `validate`: run invariant checks on a saved output document
//! - `init`: write an example configuration file
//!
//! # Example Usage
//!
//! ```bash
//! # Compile a plan
//! terracarta graph --plan tfplan.json --graph-file tfgraph.json
//!
//! # Include source files and a varfile
//! terracarta graph --plan tfplan.json --graph-file tfgraph.json \
//!     --source ./terraform --varfile prod.tfvars
//!
//! # Apply user annotations and write DOT for quick inspection
//! terracarta graph --plan tfplan.json --graph-file tfgraph.json \
//!     --annotate overrides.yaml --format dot -o graph.dot
//!
//! # Validate a previous run's output
//! terracarta validate tfdata.json
//! ```

use crate::types::OutputFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Terracarta - Terraform/OpenTofu plan-to-diagram graph compiler.
#[derive(Parser, Debug)]
#[command(
    name = "terracarta",
    author,
    version,
    about = "Terraform/OpenTofu plan-to-architecture-diagram graph compiler",
    long_about = "Terracarta reads a planner's JSON output and dependency graph, \
                  resolves variables and counts, applies provider-specific \
                  reshaping rules, and emits a normalized resource graph ready \
                  for rendering."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "TERRACARTA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a plan into the enriched graph document
    #[command(visible_alias = "g")]
    Graph(GraphArgs),

    /// Validate a saved graph document against the core invariants
    Validate(ValidateArgs),

    /// Create an example configuration file
    Init,
}

/// Arguments for the graph command.
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Planner JSON document (terraform show -json tfplan.bin)
    #[arg(long = "plan", value_name = "FILE")]
    pub plan: PathBuf,

    /// Low-level dependency graph (terraform graph | dot -Txdot_json)
    #[arg(long = "graph-file", value_name = "FILE")]
    pub graph_file: PathBuf,

    /// Source directories holding the HCL files
    #[arg(short, long = "source", value_name = "DIR")]
    pub sources: Vec<PathBuf>,

    /// Variable files (.tfvars / .tfvars.json), later files win
    #[arg(long = "varfile", value_name = "FILE")]
    pub varfiles: Vec<PathBuf>,

    /// User annotations YAML
    #[arg(long = "annotate", value_name = "FILE")]
    pub annotations: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "json", value_enum)]
    pub format: OutputFormat,
}

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// A tfdata JSON document from a previous run
    #[arg(value_name = "FILE")]
    pub document: PathBuf,
}
