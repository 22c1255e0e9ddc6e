//! Cloud provider detection and rule-table loading (pipeline stage C3).
//!
//! Resources are classified by type prefix (`aws_`, `azurerm_`/`azuread_`/
//! `azurestack_`/`azapi_`, `google_`). Mixed projects are permitted; the
//! *primary* provider is whichever contributes the most real resources,
//! and a confidence score tracks how much of the input was recognized.
//! Empty or all-unknown input defaults to AWS with low confidence.

pub mod aws;
pub mod azure;
pub mod context;
pub mod gcp;

pub use context::ProviderContext;

use crate::types::ProviderDetection;
use std::collections::BTreeMap;

/// The providers Terracarta ships rule tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Amazon Web Services
    Aws,
    /// Microsoft Azure
    Azure,
    /// Google Cloud Platform
    Gcp,
}

impl ProviderKind {
    /// Lowercase name used in detection results and synthetic node ids.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        }
    }

    /// Parse a detection-result name back into a kind.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aws" => Some(Self::Aws),
            "azure" => Some(Self::Azure),
            "gcp" => Some(Self::Gcp),
            _ => None,
        }
    }
}

/// Resource-type prefix to provider mapping.
const PROVIDER_PREFIXES: &[(&str, ProviderKind)] = &[
    ("aws_", ProviderKind::Aws),
    ("azurerm_", ProviderKind::Azure),
    ("azuread_", ProviderKind::Azure),
    ("azurestack_", ProviderKind::Azure),
    ("azapi_", ProviderKind::Azure),
    ("google_", ProviderKind::Gcp),
];

/// Classify one resource identifier. Module prefixes are skipped over,
/// so `module.net.aws_vpc.main` still detects AWS.
#[must_use]
pub fn provider_for_resource(resource: &str) -> Option<ProviderKind> {
    for part in resource.split('.') {
        for (prefix, kind) in PROVIDER_PREFIXES {
            if part.starts_with(prefix) {
                return Some(*kind);
            }
        }
    }
    None
}

/// Detect the providers present in a node list.
#[must_use]
pub fn detect(node_list: &[String]) -> ProviderDetection {
    if node_list.is_empty() {
        tracing::warn!("no resources found, defaulting to AWS");
        let mut counts = BTreeMap::new();
        counts.insert("aws".to_string(), 0);
        return ProviderDetection {
            providers: vec!["aws".to_string()],
            primary_provider: "aws".to_string(),
            resource_counts: counts,
            detection_method: "default".to_string(),
            confidence: 0.3,
        };
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut unknown = 0usize;
    for node in node_list {
        match provider_for_resource(node) {
            Some(kind) => *counts.entry(kind.as_str().to_string()).or_default() += 1,
            None => unknown += 1,
        }
    }

    if counts.is_empty() {
        tracing::warn!(
            resources = node_list.len(),
            "no recognizable provider prefixes, defaulting to AWS"
        );
        let mut default_counts = BTreeMap::new();
        default_counts.insert("aws".to_string(), 0);
        return ProviderDetection {
            providers: vec!["aws".to_string()],
            primary_provider: "aws".to_string(),
            resource_counts: default_counts,
            detection_method: "default".to_string(),
            confidence: 0.3,
        };
    }

    let primary = counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| "aws".to_string());
    let confidence = confidence_score(node_list.len(), unknown);
    let providers: Vec<String> = counts.keys().cloned().collect();

    tracing::info!(
        providers = ?providers,
        primary = %primary,
        confidence = confidence,
        "provider detection complete"
    );

    ProviderDetection {
        providers,
        primary_provider: primary,
        resource_counts: counts,
        detection_method: "resource_prefix".to_string(),
        confidence,
    }
}

/// Banded confidence from the known/total ratio.
fn confidence_score(total: usize, unknown: usize) -> f64 {
    if total == 0 {
        return 0.3;
    }
    let known_ratio = (total - unknown) as f64 / total as f64;
    if known_ratio >= 1.0 {
        1.0
    } else if known_ratio >= 0.9 {
        0.95
    } else if known_ratio >= 0.8 {
        0.85
    } else if known_ratio >= 0.7 {
        0.75
    } else if known_ratio >= 0.5 {
        0.65
    } else {
        0.4
    }
}

/// The rule tables for a detection result's primary provider.
#[must_use]
pub fn context_for(detection: &ProviderDetection) -> ProviderContext {
    match ProviderKind::from_name(&detection.primary_provider) {
        Some(ProviderKind::Azure) => azure::context(),
        Some(ProviderKind::Gcp) => gcp::context(),
        _ => aws::context(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn nodes(ids: &[&str]) -> Vec<String> {
        ids.iter().map(ToString::to_string).collect()
    }

    #[test_case("aws_instance.web", Some(ProviderKind::Aws); "aws")]
    #[test_case("azurerm_virtual_machine.app", Some(ProviderKind::Azure); "azurerm")]
    #[test_case("azuread_group.admins", Some(ProviderKind::Azure); "azuread")]
    #[test_case("google_compute_instance.vm", Some(ProviderKind::Gcp); "google")]
    #[test_case("module.net.aws_vpc.main", Some(ProviderKind::Aws); "module scoped")]
    #[test_case("random_string.id", None; "unknown")]
    fn test_provider_for_resource(input: &str, expected: Option<ProviderKind>) {
        assert_eq!(provider_for_resource(input), expected);
    }

    #[test]
    fn test_empty_input_defaults_to_aws_low_confidence() {
        let detection = detect(&[]);
        assert_eq!(detection.primary_provider, "aws");
        assert!(detection.confidence < 0.5);
        assert_eq!(detection.detection_method, "default");
    }

    #[test]
    fn test_single_provider_full_confidence() {
        let detection = detect(&nodes(&["aws_vpc.main", "aws_subnet.a"]));
        assert_eq!(detection.primary_provider, "aws");
        assert_eq!(detection.confidence, 1.0);
        assert_eq!(detection.resource_counts["aws"], 2);
    }

    #[test]
    fn test_mixed_providers_primary_is_majority() {
        let detection = detect(&nodes(&[
            "aws_vpc.main",
            "aws_subnet.a",
            "google_compute_instance.vm",
        ]));
        assert_eq!(detection.primary_provider, "aws");
        assert_eq!(detection.providers, vec!["aws", "gcp"]);
    }

    #[test]
    fn test_unknown_resources_lower_confidence() {
        let detection = detect(&nodes(&[
            "aws_vpc.main",
            "random_string.a",
            "random_string.b",
            "random_string.c",
        ]));
        assert!(detection.confidence < 0.5);
    }

    #[test]
    fn test_all_unknown_defaults_to_aws() {
        let detection = detect(&nodes(&["random_string.a", "null_resource.b"]));
        assert_eq!(detection.primary_provider, "aws");
        assert!(detection.confidence < 0.5);
    }
}
