//! Error types for Terracarta.
//!
//! This module defines the error hierarchy using `thiserror`. All errors
//! carry enough context to name which input, which resource, and which
//! pipeline phase produced them, and can be propagated with the `?`
//! operator.
//!
//! # Error Categories
//!
//! - **Missing input**: absent files, malformed planner JSON, unresolvable
//!   variables with no default. These abort the pipeline.
//! - **Missing referenced resource**: a handler needs a prerequisite node
//!   that does not exist (e.g. VPC endpoints without a VPC).
//! - **Metadata inconsistency**: graph and metadata diverged. Collected
//!   and reported together, never silently dropped.
//! - **Evaluation errors**: expressions that cannot be reduced. These do
//!   not abort the pipeline; the node is hidden instead.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// A specialized Result type for Terracarta operations.
pub type Result<T> = std::result::Result<T, TerracartaError>;

/// The main error type for Terracarta.
#[derive(Error, Debug)]
pub enum TerracartaError {
    // =========================================================================
    // I/O and File System Errors
    // =========================================================================
    /// I/O error with path context.
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// The path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Required input file absent.
    #[error("Input file not found: {path}")]
    InputNotFound {
        /// The missing file path
        path: PathBuf,
    },

    // =========================================================================
    // Input Parsing Errors
    // =========================================================================
    /// Planner JSON was malformed or missing required keys.
    #[error("Malformed planner document '{path}': {message}")]
    MalformedPlan {
        /// The plan file being parsed
        path: PathBuf,
        /// What was wrong with it
        message: String,
    },

    /// HCL source parsing error.
    #[error("Failed to parse HCL in '{file}': {message}")]
    HclParse {
        /// The file being parsed
        file: PathBuf,
        /// Error message
        message: String,
    },

    /// Annotation YAML parsing error.
    #[error("Failed to parse annotations file '{file}': {message}")]
    AnnotationParse {
        /// The annotations file
        file: PathBuf,
        /// Error message
        message: String,
    },

    // =========================================================================
    // Variable Resolution Errors
    // =========================================================================
    /// A variable reference had no supplied value and no default.
    #[error("No value supplied for var.{variable} referenced in module '{module}'")]
    UnresolvedVariable {
        /// The variable name without the `var.` prefix
        variable: String,
        /// Module the reference appears in ("main" for the root)
        module: String,
    },

    /// A local value reference could not be resolved.
    #[error("No definition found for local.{local} in module '{module}'")]
    UnresolvedLocal {
        /// The local name without the `local.` prefix
        local: String,
        /// Module the reference appears in
        module: String,
    },

    // =========================================================================
    // Graph Errors
    // =========================================================================
    /// A handler required a resource that is absent from the graph.
    #[error("Missing required resource of type '{resource_type}' (needed by {required_by})")]
    MissingResource {
        /// The type of resource that was expected
        resource_type: String,
        /// The handler or resource that needed it
        required_by: String,
        /// Extra key/value context
        context: BTreeMap<String, String>,
    },

    /// Graph and metadata diverged.
    #[error("Metadata inconsistency: {message}")]
    MetadataInconsistency {
        /// Description of the divergence
        message: String,
        /// The resource involved, when known
        resource: Option<String>,
    },

    /// A renamed node collided with an unrelated existing node.
    #[error("Node rename collision: '{renamed}' already exists (while renaming '{original}')")]
    RenameCollision {
        /// The node being renamed
        original: String,
        /// The name it collided with
        renamed: String,
    },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Internal error (should not happen in normal operation).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },

    /// Multiple errors occurred.
    #[error("Multiple errors occurred ({count} total)")]
    Multiple {
        /// Number of errors
        count: usize,
        /// The individual errors
        errors: Vec<TerracartaError>,
    },
}

impl TerracartaError {
    /// Creates an `Io` error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Creates a `MalformedPlan` error.
    #[must_use]
    pub fn malformed_plan(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MalformedPlan { path: path.into(), message: message.into() }
    }

    /// Creates a `MissingResource` error with empty context.
    #[must_use]
    pub fn missing_resource(
        resource_type: impl Into<String>,
        required_by: impl Into<String>,
    ) -> Self {
        Self::MissingResource {
            resource_type: resource_type.into(),
            required_by: required_by.into(),
            context: BTreeMap::new(),
        }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Determines whether the error is recoverable (callers may degrade
    /// instead of aborting the run).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::HclParse { .. }
                | Self::MetadataInconsistency { .. }
                | Self::MissingResource { .. }
        )
    }

    /// Returns the process exit code for the error when surfaced by the CLI.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InputNotFound { .. } | Self::MalformedPlan { .. } | Self::Io { .. } => 2,
            Self::UnresolvedVariable { .. } | Self::UnresolvedLocal { .. } => 3,
            Self::MissingResource { .. } => 4,
            _ => 1,
        }
    }

    /// Consolidates multiple errors into a single `Multiple` if there is
    /// more than one. Returns `Ok(())` when the list is empty.
    pub fn collect(errors: Vec<Self>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.into_iter().next().unwrap())
        } else {
            Err(Self::Multiple { count: errors.len(), errors })
        }
    }
}

impl From<std::io::Error> for TerracartaError {
    fn from(source: std::io::Error) -> Self {
        // Prefer TerracartaError::io(path, source) where a path is known.
        Self::Io { path: PathBuf::new(), source }
    }
}

impl From<serde_json::Error> for TerracartaError {
    fn from(source: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON serialization/deserialization error: {source}"),
        }
    }
}

/// A utility for collecting multiple errors during parsing or validation.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<TerracartaError>,
}

impl ErrorCollector {
    /// Create a new error collector.
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Add an error to the collection.
    pub fn add(&mut self, error: TerracartaError) {
        self.errors.push(error);
    }

    /// Get the number of collected errors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.errors.len()
    }

    /// Check if there are any errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Borrow the collected errors.
    #[must_use]
    pub fn errors(&self) -> &[TerracartaError] {
        &self.errors
    }

    /// Convert to a Result, returning a `Multiple` error if any were collected.
    pub fn into_result(self) -> Result<()> {
        TerracartaError::collect(self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_empty_is_ok() {
        assert!(TerracartaError::collect(vec![]).is_ok());
    }

    #[test]
    fn test_collect_single_preserves_error() {
        let err = TerracartaError::UnresolvedVariable {
            variable: "region".into(),
            module: "main".into(),
        };
        let result = TerracartaError::collect(vec![err]);
        assert!(matches!(
            result,
            Err(TerracartaError::UnresolvedVariable { .. })
        ));
    }

    #[test]
    fn test_exit_codes() {
        let missing = TerracartaError::InputNotFound { path: "tfplan.json".into() };
        assert_eq!(missing.exit_code(), 2);

        let unresolved = TerracartaError::UnresolvedVariable {
            variable: "env".into(),
            module: "main".into(),
        };
        assert_eq!(unresolved.exit_code(), 3);

        let resource = TerracartaError::missing_resource("aws_vpc", "aws_vpc_endpoint handler");
        assert_eq!(resource.exit_code(), 4);
    }

    #[test]
    fn test_collector_aggregates() {
        let mut collector = ErrorCollector::new();
        collector.add(TerracartaError::internal("one"));
        collector.add(TerracartaError::internal("two"));
        assert_eq!(collector.count(), 2);
        assert!(matches!(
            collector.into_result(),
            Err(TerracartaError::Multiple { count: 2, .. })
        ));
    }
}
