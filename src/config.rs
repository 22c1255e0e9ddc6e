//! Configuration module for Terracarta.
//!
//! Configuration comes from a YAML file (`terracarta.yaml`), found
//! either next to the invocation or passed with `--config`, with
//! environment and CLI flags layered on top by the binary.
//!
//! # Configuration File Format
//!
//! ```yaml
//! # terracarta.yaml
//!
//! scan:
//!   exclude_patterns:
//!     - "**/examples/**"
//!   continue_on_error: true
//!
//! output:
//!   pretty: true
//!   colored: true
//! ```

use crate::error::{Result, TerracartaError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source-scanning options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Glob patterns excluded from the source walk.
    pub exclude_patterns: Vec<String>,

    /// Keep going when individual files fail to parse.
    pub continue_on_error: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { exclude_patterns: Vec::new(), continue_on_error: true }
    }
}

/// Output options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    /// Pretty-print JSON output.
    pub pretty: bool,

    /// Use colored terminal output.
    pub colored: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self { pretty: true, colored: true }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source-scanning options.
    pub scan: ScanOptions,

    /// Output options.
    pub output: OutputOptions,
}

impl Config {
    /// Parse configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TerracartaError::AnnotationParse {
            file: "terracarta.yaml".into(),
            message: e.to_string(),
        })
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TerracartaError::InputNotFound { path: path.to_path_buf() });
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| TerracartaError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Example configuration written by `terracarta init`.
    #[must_use]
    pub fn example() -> &'static str {
        r#"# Terracarta configuration

scan:
  exclude_patterns:
    - "**/examples/**"
  continue_on_error: true

output:
  pretty: true
  colored: true
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.scan.continue_on_error);
        assert!(config.output.pretty);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
scan:
  exclude_patterns:
    - "**/test/**"
  continue_on_error: false
output:
  pretty: false
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.scan.exclude_patterns, vec!["**/test/**"]);
        assert!(!config.scan.continue_on_error);
        assert!(!config.output.pretty);
        // Unset keys keep their defaults.
        assert!(config.output.colored);
    }

    #[test]
    fn test_example_parses() {
        assert!(Config::from_yaml(Config::example()).is_ok());
    }
}
