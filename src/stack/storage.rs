//! Storage layer: buckets and the deployments that seed them
//!
//! Bucket deployments and bucket emptying are custom resources. Their
//! provider functions are declared once per graph and shared by every
//! resource that needs them. Deployment sources are file assets: the
//! deployment tooling zips each source directory and uploads it to the
//! staging bucket named by [`ASSET_STAGING_BUCKET_PARAMETER`] before the
//! stack is created.

use super::naming::Namer;
use crate::aws::arn;
use crate::dataset::fingerprint_directory;
use crate::resource::{
    intrinsic, DeploymentGraph, FileAsset, Parameter, RemovalPolicy, ResourceRef,
};
use anyhow::Result;
use serde_json::{json, Value};
use std::path::Path;

/// Key prefix of the datasets inside the raw bucket
pub const DATA_FOLDER_PREFIX: &str = "raw";

/// Key prefix of the Glue scripts inside the scripts bucket
pub const SCRIPTS_FOLDER_PREFIX: &str = "scripts";

/// Template parameter naming the bucket file assets are staged in
pub const ASSET_STAGING_BUCKET_PARAMETER: &str = "AssetStagingBucket";

/// Tag the auto-delete handler looks for before emptying a bucket
pub const AUTO_DELETE_TAG: &str = "aws-cdk:auto-delete-objects";

/// Memory and ephemeral storage of the dataset deployment, in MiB.
/// The datasets are large enough that the defaults run out.
const DATASET_DEPLOYMENT_SIZE_MIB: u32 = 4096 * 2;

const BUCKET_DEPLOYMENT_PROVIDER: &str = "CustomCDKBucketDeployment";
const AUTO_DELETE_PROVIDER: &str = "CustomS3AutoDeleteObjectsProvider";

const BUCKET_DEPLOYMENT_HANDLER: &str = include_str!("../handlers/bucket_deployment.py");
const AUTO_DELETE_HANDLER: &str = include_str!("../handlers/auto_delete_objects.py");

const HANDLER_RUNTIME: &str = "python3.12";
const HANDLER_TIMEOUT_SECS: u32 = 900;
const LAMBDA_BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";

/// A declared bucket and its physical name
#[derive(Debug, Clone)]
pub struct Bucket {
    pub resource: ResourceRef,
    pub name: String,
}

impl Bucket {
    /// `s3://<bucket>[/<key>]`
    pub fn s3_url(&self, key: Option<&str>) -> Value {
        arn::s3_url_for_object(&self.resource, key)
    }

    /// `{"Ref": <bucket>}`, which resolves to the bucket name
    pub fn name_ref(&self) -> Value {
        intrinsic::reference(&self.resource)
    }

    fn arns(&self) -> Value {
        let arn = intrinsic::get_att(&self.resource, "Arn");
        json!([arn.clone(), arn::append_path(&arn, "/*")])
    }
}

/// The always-present buckets
#[derive(Debug, Clone)]
pub struct StorageLayer {
    pub raw: Bucket,
    pub processed: Bucket,
    pub scripts: Bucket,
}

/// Lambda function backing a custom resource, and its execution role
#[derive(Debug, Clone)]
struct Provider {
    role: ResourceRef,
    function: ResourceRef,
}

impl Provider {
    fn service_token(&self) -> Value {
        intrinsic::get_att(&self.function, "Arn")
    }
}

/// Declare the provider `id` unless the graph already has it.
///
/// `size_mib` sets both memory and ephemeral storage.
fn declare_provider(
    graph: &mut DeploymentGraph,
    id: &str,
    code: &str,
    size_mib: Option<u32>,
    role_policies: Vec<Value>,
) -> Result<Provider> {
    let role_id = format!("{}/Role", id);
    let function_id = format!("{}/Handler", id);
    if let (Some(role), Some(function)) = (graph.find(&role_id), graph.find(&function_id)) {
        return Ok(Provider {
            role: role.to_ref(),
            function: function.to_ref(),
        });
    }

    let mut role_properties = json!({
        "AssumeRolePolicyDocument": {
            "Version": "2012-10-17",
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": arn::service_principal("lambda") }
            }]
        },
        "ManagedPolicyArns": [arn::managed_policy_arn(LAMBDA_BASIC_EXECUTION_POLICY)]
    });
    if let Value::Object(map) = &mut role_properties {
        if !role_policies.is_empty() {
            map.insert("Policies".to_string(), Value::Array(role_policies));
        }
    }
    let role = graph.add(&role_id, "iam-role", role_properties)?;

    let mut properties = json!({
        "Runtime": HANDLER_RUNTIME,
        "Handler": "index.handler",
        "Timeout": HANDLER_TIMEOUT_SECS,
        "Role": intrinsic::get_att(&role, "Arn"),
        "Code": { "ZipFile": code }
    });
    if let (Some(size), Value::Object(map)) = (size_mib, &mut properties) {
        map.insert("MemorySize".to_string(), json!(size));
        map.insert("EphemeralStorage".to_string(), json!({ "Size": size }));
    }
    let function = graph.add(&function_id, "lambda-function", properties)?;

    tracing::debug!("Declared custom resource provider {}", id);
    Ok(Provider { role, function })
}

/// Declare a bucket that is emptied and deleted with the stack
pub(crate) fn declare_bucket(
    graph: &mut DeploymentGraph,
    construct_id: &str,
    bucket_name: String,
) -> Result<Bucket> {
    let resource = graph.add(
        construct_id,
        "s3-bucket",
        json!({
            "BucketName": bucket_name,
            "Tags": [{ "Key": AUTO_DELETE_TAG, "Value": "true" }]
        }),
    )?;
    graph.set_removal_policy(&resource, RemovalPolicy::Destroy)?;

    let bucket = Bucket {
        resource,
        name: bucket_name,
    };
    declare_auto_delete(graph, &bucket)?;
    Ok(bucket)
}

/// Let the auto-delete provider empty `bucket` when the stack is deleted.
///
/// The provider acts through a bucket policy, so the custom resource
/// depends on that policy and is deleted before it.
fn declare_auto_delete(graph: &mut DeploymentGraph, bucket: &Bucket) -> Result<ResourceRef> {
    let provider = declare_provider(graph, AUTO_DELETE_PROVIDER, AUTO_DELETE_HANDLER, None, Vec::new())?;
    let owner = &bucket.resource.construct_id;

    let policy = graph.add(
        &format!("{}/Policy", owner),
        "s3-bucket-policy",
        json!({
            "Bucket": bucket.name_ref(),
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": [
                        "s3:PutBucketPolicy",
                        "s3:GetBucket*",
                        "s3:List*",
                        "s3:DeleteObject*"
                    ],
                    "Effect": "Allow",
                    "Principal": { "AWS": intrinsic::get_att(&provider.role, "Arn") },
                    "Resource": bucket.arns()
                }]
            }
        }),
    )?;
    let cleanup = graph.add(
        &format!("{}/AutoDeleteObjectsCustomResource", owner),
        "s3-auto-delete-objects",
        json!({
            "ServiceToken": provider.service_token(),
            "BucketName": bucket.name_ref()
        }),
    )?;
    graph.add_dependency(&cleanup, &policy)?;
    Ok(cleanup)
}

/// Declare the staging bucket parameter. Its default is the asset bucket of
/// a bootstrapped account and region.
fn staging_bucket(graph: &mut DeploymentGraph, namer: &Namer) -> Result<Value> {
    graph.add_parameter(
        ASSET_STAGING_BUCKET_PARAMETER,
        Parameter {
            param_type: "String".to_string(),
            description: Some("Bucket the deployment tooling uploads file assets to".to_string()),
            default: Some(format!(
                "cdk-hnb659fds-assets-{}-{}",
                namer.account(),
                namer.region()
            )),
        },
    )
}

/// Declare a deployment copying `source_dir` verbatim into `bucket`.
///
/// The directory is registered as a file asset keyed by its content
/// fingerprint, so changed content is a new object key and redeploys.
fn declare_bucket_deployment(
    graph: &mut DeploymentGraph,
    namer: &Namer,
    construct_id: &str,
    source_dir: &Path,
    bucket: &Bucket,
    key_prefix: &str,
    size_mib: Option<u32>,
) -> Result<ResourceRef> {
    let staging = staging_bucket(graph, namer)?;
    let fingerprint = fingerprint_directory(source_dir)?;
    let object_key = format!("{}.zip", fingerprint);
    graph.add_file_asset(FileAsset {
        id: fingerprint,
        source_path: source_dir.to_path_buf(),
        bucket_parameter: ASSET_STAGING_BUCKET_PARAMETER.to_string(),
        object_key: object_key.clone(),
    })?;

    let provider_id = match size_mib {
        Some(size) => format!("{}{}MiB", BUCKET_DEPLOYMENT_PROVIDER, size),
        None => BUCKET_DEPLOYMENT_PROVIDER.to_string(),
    };
    let staging_arn = intrinsic::join("", vec![json!("arn:aws:s3:::"), staging.clone()]);
    let read_staged = json!({
        "PolicyName": "ReadStagedAssets",
        "PolicyDocument": {
            "Version": "2012-10-17",
            "Statement": [{
                "Action": ["s3:GetObject*", "s3:GetBucket*", "s3:List*"],
                "Effect": "Allow",
                "Resource": [staging_arn.clone(), arn::append_path(&staging_arn, "/*")]
            }]
        }
    });
    let provider = declare_provider(
        graph,
        &provider_id,
        BUCKET_DEPLOYMENT_HANDLER,
        size_mib,
        vec![read_staged],
    )?;

    let access = graph.add(
        &format!("{}/DestinationAccess", construct_id),
        "iam-policy",
        json!({
            "PolicyName": format!("{}-write", bucket.name),
            "Roles": [intrinsic::reference(&provider.role)],
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": [
                        "s3:GetObject*",
                        "s3:GetBucket*",
                        "s3:List*",
                        "s3:PutObject",
                        "s3:DeleteObject*",
                        "s3:Abort*"
                    ],
                    "Effect": "Allow",
                    "Resource": bucket.arns()
                }]
            }
        }),
    )?;

    let deployment = graph.add(
        construct_id,
        "s3-bucket-deployment",
        json!({
            "ServiceToken": provider.service_token(),
            "SourceBucketNames": [staging],
            "SourceObjectKeys": [object_key],
            "DestinationBucketName": bucket.name_ref(),
            "DestinationBucketKeyPrefix": key_prefix,
            "Prune": true
        }),
    )?;
    graph.add_dependency(&deployment, &access)?;
    Ok(deployment)
}

/// Declare the raw, processed and scripts buckets and seed the raw and
/// scripts buckets from the local asset directories
pub(super) fn declare(
    graph: &mut DeploymentGraph,
    namer: &Namer,
    assets_dir: &Path,
    scripts_dir: &Path,
) -> Result<StorageLayer> {
    let raw = declare_bucket(graph, "demo_athena_bucket", namer.global_name("raw-data-bucket"))?;
    let processed = declare_bucket(
        graph,
        "demo_athena_bucket_processed",
        namer.global_name("processed-data-bucket"),
    )?;
    let scripts = declare_bucket(graph, "glue_scripts", namer.global_name("glue-scripts"))?;

    declare_bucket_deployment(
        graph,
        namer,
        "demo_athena_bucket_deployment_populate_bucket_with_datasets",
        assets_dir,
        &raw,
        &format!("{}/", DATA_FOLDER_PREFIX),
        Some(DATASET_DEPLOYMENT_SIZE_MIB),
    )?;
    declare_bucket_deployment(
        graph,
        namer,
        "demo_gluescripts_bucket_deployment",
        scripts_dir,
        &scripts,
        SCRIPTS_FOLDER_PREFIX,
        None,
    )?;

    tracing::info!(
        "Storage layer declared: {}, {}, {}",
        raw.name,
        processed.name,
        scripts.name
    );

    Ok(StorageLayer {
        raw,
        processed,
        scripts,
    })
}
