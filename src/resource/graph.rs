//! Deployment Graph
//!
//! In-memory graph of declared resources and the explicit dependency edges
//! between them. The graph is built single-threaded and handed, unchanged,
//! to the synthesizer once composition is finished.

use super::intrinsic::{collect_references, Reference};
use super::registry::{get_kind, ResourceKindDef};
use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

/// Number of hash hex digits appended to a logical id
const LOGICAL_ID_HASH_LEN: usize = 8;

/// Property naming the provider function of a custom resource
pub const SERVICE_TOKEN: &str = "ServiceToken";

/// What happens to a resource when the stack is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    Destroy,
    Retain,
    Snapshot,
}

impl RemovalPolicy {
    /// CloudFormation `DeletionPolicy` value
    pub fn as_deletion_policy(&self) -> &'static str {
        match self {
            Self::Destroy => "Delete",
            Self::Retain => "Retain",
            Self::Snapshot => "Snapshot",
        }
    }
}

/// Handle to a declared resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub construct_id: String,
    pub logical_id: String,
}

/// A declared resource
#[derive(Debug, Clone)]
pub struct Resource {
    pub construct_id: String,
    pub logical_id: String,
    /// Registry key, e.g. `s3-bucket`
    pub kind: String,
    pub properties: Map<String, Value>,
    /// Logical ids this resource must be provisioned after
    pub depends_on: BTreeSet<String>,
    pub removal_policy: Option<RemovalPolicy>,
}

impl Resource {
    /// Registry definition for this resource's kind
    pub fn kind_def(&self) -> Option<&'static ResourceKindDef> {
        get_kind(&self.kind)
    }

    pub fn to_ref(&self) -> ResourceRef {
        ResourceRef {
            construct_id: self.construct_id.clone(),
            logical_id: self.logical_id.clone(),
        }
    }

    /// Read a string property
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

/// Stack output
#[derive(Debug, Clone)]
pub struct Output {
    pub description: Option<String>,
    pub value: Value,
}

/// Template parameter, resolved by CloudFormation at deploy time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub param_type: String,
    pub description: Option<String>,
    pub default: Option<String>,
}

/// A local directory that the deployment tooling packages as a zip and
/// uploads to the staging bucket before the stack is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAsset {
    /// Content fingerprint, also the asset id
    pub id: String,
    pub source_path: PathBuf,
    /// Parameter holding the staging bucket name
    pub bucket_parameter: String,
    pub object_key: String,
}

/// Resource declarations plus dependency edges
#[derive(Debug, Clone, Default)]
pub struct DeploymentGraph {
    resources: BTreeMap<String, Resource>,
    by_construct: HashMap<String, String>,
    outputs: BTreeMap<String, Output>,
    parameters: BTreeMap<String, Parameter>,
    assets: BTreeMap<String, FileAsset>,
}

/// Derive a CloudFormation logical id from a construct id.
///
/// Logical ids are alphanumeric only, so the construct id is stripped and a
/// hash of the full construct id keeps ids like `name.basics` and
/// `namebasics` apart.
pub fn logical_id_for(construct_id: &str) -> String {
    let mut id: String = construct_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let hex = blake3::hash(construct_id.as_bytes()).to_hex();
    id.push_str(&hex.as_str()[..LOGICAL_ID_HASH_LEN].to_ascii_uppercase());
    id
}

impl DeploymentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource.
    ///
    /// Every `Ref`/`Fn::GetAtt` found in `properties` is recorded as an
    /// explicit dependency edge; the referenced resources must already exist.
    pub fn add(&mut self, construct_id: &str, kind: &str, properties: Value) -> Result<ResourceRef> {
        let Some(kind_def) = get_kind(kind) else {
            bail!("Unknown resource kind: {}", kind);
        };
        if self.by_construct.contains_key(construct_id) {
            bail!("Duplicate construct id: {}", construct_id);
        }

        let logical_id = logical_id_for(construct_id);
        if self.resources.contains_key(&logical_id) {
            bail!(
                "Logical id {} for {} is already taken",
                logical_id,
                construct_id
            );
        }

        let properties = match properties {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => bail!(
                "Properties of {} must be an object, got {}",
                construct_id,
                other
            ),
        };

        if kind_def.is_custom_resource() && !properties.contains_key(SERVICE_TOKEN) {
            bail!(
                "Custom resource {} ({}) needs a {}",
                construct_id,
                kind,
                SERVICE_TOKEN
            );
        }

        let depends_on = self.edges_for(construct_id, &properties)?;

        tracing::debug!(
            "declare {} ({}) as {}, depends on {:?}",
            construct_id,
            kind,
            logical_id,
            depends_on
        );

        self.resources.insert(
            logical_id.clone(),
            Resource {
                construct_id: construct_id.to_string(),
                logical_id: logical_id.clone(),
                kind: kind.to_string(),
                properties,
                depends_on,
                removal_policy: None,
            },
        );
        self.by_construct
            .insert(construct_id.to_string(), logical_id.clone());

        Ok(ResourceRef {
            construct_id: construct_id.to_string(),
            logical_id,
        })
    }

    /// Resolve the references in a property block into dependency edges
    fn edges_for(&self, construct_id: &str, properties: &Map<String, Value>) -> Result<BTreeSet<String>> {
        let mut edges = BTreeSet::new();
        for reference in collect_references(&Value::Object(properties.clone())) {
            if self.is_parameter_ref(&reference) {
                continue;
            }
            let Some(target) = self.resources.get(reference.target()) else {
                bail!(
                    "{} references unknown resource {}",
                    construct_id,
                    reference.target()
                );
            };
            if let Reference::GetAtt(_, attribute) = &reference {
                let readable = target
                    .kind_def()
                    .map(|def| def.has_attribute(attribute))
                    .unwrap_or(false);
                if !readable {
                    bail!(
                        "{} reads attribute {} which {} ({}) does not expose",
                        construct_id,
                        attribute,
                        target.construct_id,
                        target.kind
                    );
                }
            }
            edges.insert(target.logical_id.clone());
        }
        Ok(edges)
    }

    fn is_parameter_ref(&self, reference: &Reference) -> bool {
        matches!(reference, Reference::Ref(name) if self.parameters.contains_key(name))
    }

    /// Record an explicit edge: `dependent` is provisioned after `dependency`
    pub fn add_dependency(&mut self, dependent: &ResourceRef, dependency: &ResourceRef) -> Result<()> {
        if dependent.logical_id == dependency.logical_id {
            bail!("{} cannot depend on itself", dependent.construct_id);
        }
        if !self.resources.contains_key(&dependency.logical_id) {
            bail!("Unknown dependency: {}", dependency.construct_id);
        }
        let resource = self.resource_mut(dependent)?;
        resource.depends_on.insert(dependency.logical_id.clone());
        tracing::debug!(
            "edge {} -> {}",
            dependent.construct_id,
            dependency.construct_id
        );
        Ok(())
    }

    pub fn set_removal_policy(&mut self, target: &ResourceRef, policy: RemovalPolicy) -> Result<()> {
        self.resource_mut(target)?.removal_policy = Some(policy);
        Ok(())
    }

    /// Mutable access to a resource's properties.
    ///
    /// Edges are not re-derived here; `validate` rejects references added
    /// this way without a matching edge.
    pub fn properties_mut(&mut self, target: &ResourceRef) -> Result<&mut Map<String, Value>> {
        Ok(&mut self.resource_mut(target)?.properties)
    }

    fn resource_mut(&mut self, target: &ResourceRef) -> Result<&mut Resource> {
        self.resources
            .get_mut(&target.logical_id)
            .ok_or_else(|| anyhow!("Unknown resource: {}", target.construct_id))
    }

    /// Add a stack output; references must point at declared resources
    pub fn add_output(&mut self, name: &str, description: Option<&str>, value: Value) -> Result<()> {
        for reference in collect_references(&value) {
            if !self.is_parameter_ref(&reference) && !self.resources.contains_key(reference.target()) {
                bail!(
                    "Output {} references unknown resource {}",
                    name,
                    reference.target()
                );
            }
        }
        self.outputs.insert(
            name.to_string(),
            Output {
                description: description.map(|d| d.to_string()),
                value,
            },
        );
        Ok(())
    }

    /// Declare a template parameter once and return its `Ref`.
    ///
    /// Declaring the same name again with the same definition is a no-op.
    pub fn add_parameter(&mut self, name: &str, parameter: Parameter) -> Result<Value> {
        if self.resources.contains_key(name) {
            bail!("Parameter {} clashes with a resource logical id", name);
        }
        match self.parameters.get(name) {
            Some(existing) if *existing != parameter => {
                bail!("Parameter {} is already declared differently", name)
            }
            Some(_) => {}
            None => {
                self.parameters.insert(name.to_string(), parameter);
            }
        }
        Ok(serde_json::json!({ "Ref": name }))
    }

    /// Register a file asset; assets with the same fingerprint are stored once
    pub fn add_file_asset(&mut self, asset: FileAsset) -> Result<()> {
        if !self.parameters.contains_key(&asset.bucket_parameter) {
            bail!(
                "Asset {} stages into undeclared parameter {}",
                asset.id,
                asset.bucket_parameter
            );
        }
        tracing::debug!("asset {} from {}", asset.id, asset.source_path.display());
        self.assets.entry(asset.id.clone()).or_insert(asset);
        Ok(())
    }

    pub fn parameters(&self) -> &BTreeMap<String, Parameter> {
        &self.parameters
    }

    pub fn assets(&self) -> impl Iterator<Item = &FileAsset> {
        self.assets.values()
    }

    pub fn get(&self, target: &ResourceRef) -> Option<&Resource> {
        self.resources.get(&target.logical_id)
    }

    /// Look up a resource by construct id
    pub fn find(&self, construct_id: &str) -> Option<&Resource> {
        self.by_construct
            .get(construct_id)
            .and_then(|id| self.resources.get(id))
    }

    pub fn contains(&self, construct_id: &str) -> bool {
        self.by_construct.contains_key(construct_id)
    }

    /// All resources, ordered by logical id
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// All resources of one kind, ordered by logical id
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources.values().filter(move |r| r.kind == kind)
    }

    pub fn count_of_kind(&self, kind: &str) -> usize {
        self.of_kind(kind).count()
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Check the graph invariants before handing it to the deployment engine:
    /// every edge points at a declared resource, every reference in a
    /// property block has an explicit edge, and the edges are acyclic.
    pub fn validate(&self) -> Result<()> {
        for resource in self.resources.values() {
            for dependency in &resource.depends_on {
                if !self.resources.contains_key(dependency) {
                    bail!(
                        "{} depends on unknown resource {}",
                        resource.construct_id,
                        dependency
                    );
                }
            }
            let custom = resource
                .kind_def()
                .map(|def| def.is_custom_resource())
                .unwrap_or(false);
            if custom && !resource.properties.contains_key(SERVICE_TOKEN) {
                bail!("{} has no {}", resource.construct_id, SERVICE_TOKEN);
            }
            let properties = Value::Object(resource.properties.clone());
            for reference in collect_references(&properties) {
                if self.is_parameter_ref(&reference) {
                    continue;
                }
                if !resource.depends_on.contains(reference.target()) {
                    bail!(
                        "{} references {} without a dependency edge",
                        resource.construct_id,
                        reference.target()
                    );
                }
            }
        }
        self.topo_order().map(|_| ())
    }

    /// Resources in an order where every dependency comes first.
    /// Ties are broken by logical id so the order is stable.
    pub fn topo_order(&self) -> Result<Vec<&Resource>> {
        let mut remaining: HashMap<&str, usize> = self
            .resources
            .values()
            .map(|r| (r.logical_id.as_str(), r.depends_on.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for resource in self.resources.values() {
            for dependency in &resource.depends_on {
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(resource.logical_id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut ordered = Vec::with_capacity(self.resources.len());

        while let Some(id) = ready.pop_first() {
            if let Some(resource) = self.resources.get(id) {
                ordered.push(resource);
            }
            for &dependent in dependents.get(id).map(|v| v.as_slice()).unwrap_or_default() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if ordered.len() != self.resources.len() {
            let stuck: BTreeSet<&str> = remaining
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(id, _)| *id)
                .collect();
            bail!("Dependency cycle between resources: {:?}", stuck);
        }

        Ok(ordered)
    }
}
