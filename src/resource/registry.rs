//! Resource Registry - Load resource kind definitions from JSON
//!
//! This module loads every resource kind the stack can declare from embedded
//! JSON files and provides lookup functions for the graph and synthesizer.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/storage.json"),
    include_str!("../resources/iam.json"),
    include_str!("../resources/glue.json"),
    include_str!("../resources/athena.json"),
    include_str!("../resources/network.json"),
    include_str!("../resources/database.json"),
    include_str!("../resources/lambda.json"),
];

/// CloudFormation type prefix of provider-backed resources
const CUSTOM_RESOURCE_PREFIX: &str = "Custom::";

/// Resource kind definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceKindDef {
    pub display_name: String,
    pub service: String,
    /// CloudFormation type written to the template
    pub cfn_type: String,
    /// Attributes readable through `Fn::GetAtt`.
    /// An empty list means the kind exposes no attributes.
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Template transform required when this kind is present
    #[serde(default)]
    pub transform: Option<String>,
}

impl ResourceKindDef {
    /// Check whether `Fn::GetAtt` may read `attribute` from this kind
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }

    /// Custom resources are backed by a provider function named in `ServiceToken`
    pub fn is_custom_resource(&self) -> bool {
        self.cfn_type.starts_with(CUSTOM_RESOURCE_PREFIX)
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: HashMap<String, ResourceKindDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        let mut final_config = ResourceConfig {
            resources: HashMap::new(),
        };

        for content in RESOURCE_FILES {
            let partial: ResourceConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            final_config.resources.extend(partial.resources);
        }

        final_config
    })
}

/// Get a resource kind definition by key
pub fn get_kind(key: &str) -> Option<&'static ResourceKindDef> {
    get_registry().resources.get(key)
}

/// Get all resource kind keys, sorted
pub fn get_all_kind_keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect();
    keys.sort_unstable();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads_successfully() {
        let registry = get_registry();
        assert!(
            !registry.resources.is_empty(),
            "Registry should have resource kinds"
        );
    }

    #[test]
    fn test_bucket_kind_exists() {
        let kind = get_kind("s3-bucket").expect("s3-bucket kind should exist");
        assert_eq!(kind.cfn_type, "AWS::S3::Bucket");
        assert_eq!(kind.service, "s3");
        assert!(kind.has_attribute("Arn"));
        assert!(!kind.has_attribute("Endpoint.Port"));
    }

    #[test]
    fn test_only_sam_requires_transform() {
        let with_transform: Vec<&str> = get_all_kind_keys()
            .into_iter()
            .filter(|k| get_kind(k).and_then(|d| d.transform.as_ref()).is_some())
            .collect();
        assert_eq!(with_transform, vec!["sam-application"]);
    }

    #[test]
    fn test_custom_resource_kinds() {
        let custom: Vec<&str> = get_all_kind_keys()
            .into_iter()
            .filter(|k| get_kind(k).map(|d| d.is_custom_resource()).unwrap_or(false))
            .collect();
        assert_eq!(custom, vec!["s3-auto-delete-objects", "s3-bucket-deployment"]);
        assert!(get_kind("lambda-function").unwrap().has_attribute("Arn"));
    }

    #[test]
    fn test_get_all_kind_keys_sorted() {
        let keys = get_all_kind_keys();
        assert!(keys.contains(&"athena-named-query"));
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }
}
