//! Template synthesis
//!
//! Turns a validated [`DeploymentGraph`] into a CloudFormation template and
//! renders it as JSON or YAML. The file assets the template expects in the
//! staging bucket are described by a separate asset manifest.

use crate::resource::DeploymentGraph;
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Asset manifest schema understood by the deployment tooling
const ASSET_MANIFEST_VERSION: &str = "36.0.0";

/// Destination key meaning "the account and region being deployed to"
const CURRENT_ENVIRONMENT: &str = "current_account-current_region";

/// Metadata key recording which construct a resource came from
pub const CONSTRUCT_PATH_KEY: &str = "demo:construct-path";

/// Output format of the synthesized template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Debug, Clone, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Transform", skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(rename = "Parameters", skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, TemplateParameter>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, TemplateResource>,
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateParameter {
    #[serde(rename = "Type")]
    pub param_type: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Default", skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "Properties", skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
    #[serde(rename = "Metadata", skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateOutput {
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Value")]
    pub value: Value,
}

/// Validate `graph` and build the template of stack `stack_name`
pub fn synthesize(graph: &DeploymentGraph, stack_name: &str) -> Result<Template> {
    graph
        .validate()
        .with_context(|| format!("Deployment graph of {} is invalid", stack_name))?;

    let mut transform = None;
    let mut resources = BTreeMap::new();
    for resource in graph.resources() {
        let kind = resource
            .kind_def()
            .ok_or_else(|| anyhow!("Unknown resource kind: {}", resource.kind))?;
        if kind.transform.is_some() {
            transform = kind.transform.clone();
        }

        let mut metadata = Map::new();
        metadata.insert(
            CONSTRUCT_PATH_KEY.to_string(),
            Value::String(format!("{}/{}", stack_name, resource.construct_id)),
        );
        let policy = resource
            .removal_policy
            .map(|p| p.as_deletion_policy().to_string());

        resources.insert(
            resource.logical_id.clone(),
            TemplateResource {
                resource_type: kind.cfn_type.clone(),
                properties: resource.properties.clone(),
                depends_on: resource.depends_on.iter().cloned().collect(),
                deletion_policy: policy.clone(),
                update_replace_policy: policy,
                metadata,
            },
        );
    }

    let outputs = graph
        .outputs()
        .iter()
        .map(|(name, output)| {
            (
                name.clone(),
                TemplateOutput {
                    description: output.description.clone(),
                    value: output.value.clone(),
                },
            )
        })
        .collect();

    let parameters = graph
        .parameters()
        .iter()
        .map(|(name, parameter)| {
            (
                name.clone(),
                TemplateParameter {
                    param_type: parameter.param_type.clone(),
                    description: parameter.description.clone(),
                    default: parameter.default.clone(),
                },
            )
        })
        .collect();

    tracing::info!(
        "Synthesized {} with {} resources",
        stack_name,
        resources.len()
    );

    Ok(Template {
        format_version: TEMPLATE_FORMAT_VERSION.to_string(),
        description: format!("Data analytics demo environment ({})", stack_name),
        transform,
        parameters,
        resources,
        outputs,
    })
}

impl Template {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => self.to_json(),
            OutputFormat::Yaml => self.to_yaml(),
        }
    }
}

/// Files the deployment tooling must package and upload before the stack
/// is created, in the layout of a cloud assembly `*.assets.json`
#[derive(Debug, Clone, Serialize)]
pub struct AssetManifest {
    pub version: String,
    pub files: BTreeMap<String, FileAssetEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileAssetEntry {
    pub source: FileAssetSource,
    pub destinations: BTreeMap<String, FileAssetDestination>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileAssetSource {
    pub path: PathBuf,
    /// Always `zip`: directories are archived before upload
    pub packaging: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAssetDestination {
    pub bucket_name: String,
    pub object_key: String,
}

/// Build the asset manifest of `graph`.
///
/// The destination bucket is the default of the staging parameter, so a
/// deployment overriding the parameter must upload to the same bucket.
pub fn asset_manifest(graph: &DeploymentGraph) -> Result<AssetManifest> {
    let mut files = BTreeMap::new();
    for asset in graph.assets() {
        let bucket_name = graph
            .parameters()
            .get(&asset.bucket_parameter)
            .and_then(|p| p.default.clone());
        let Some(bucket_name) = bucket_name else {
            bail!(
                "Asset {} stages into {} which has no default bucket",
                asset.id,
                asset.bucket_parameter
            );
        };
        if !asset.source_path.is_dir() {
            tracing::warn!(
                "Asset source {} does not exist, the upload will fail",
                asset.source_path.display()
            );
        }

        let destinations = BTreeMap::from([(
            CURRENT_ENVIRONMENT.to_string(),
            FileAssetDestination {
                bucket_name,
                object_key: asset.object_key.clone(),
            },
        )]);
        files.insert(
            asset.id.clone(),
            FileAssetEntry {
                source: FileAssetSource {
                    path: asset.source_path.clone(),
                    packaging: "zip".to_string(),
                },
                destinations,
            },
        );
    }

    Ok(AssetManifest {
        version: ASSET_MANIFEST_VERSION.to_string(),
        files,
    })
}

impl AssetManifest {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One line of a deployment plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub logical_id: String,
    pub resource_type: String,
    pub construct_id: String,
    pub depends_on: Vec<String>,
}

/// Resources in provisioning order
pub fn plan(graph: &DeploymentGraph) -> Result<Vec<PlanStep>> {
    graph.validate()?;
    graph
        .topo_order()?
        .into_iter()
        .map(|resource| {
            let kind = resource
                .kind_def()
                .ok_or_else(|| anyhow!("Unknown resource kind: {}", resource.kind))?;
            Ok(PlanStep {
                logical_id: resource.logical_id.clone(),
                resource_type: kind.cfn_type.clone(),
                construct_id: resource.construct_id.clone(),
                depends_on: resource.depends_on.iter().cloned().collect(),
            })
        })
        .collect()
}
