//! Demo stack composition
//!
//! [`DemoStack`] is the stack context of one deployment. Creating it declares
//! the storage and catalog layers; the `with_*` methods add optional
//! extensions and can be chained in any order. Shared prerequisites (VPC,
//! DynamoDB table) live in `Option` fields and are declared on first need.
//!
//! # Module Structure
//!
//! - [`naming`] - physical resource names
//! - [`storage`] - buckets and bucket deployments
//! - [`catalog`] - Glue databases, role, crawlers, classifier
//! - [`compute`] - Glue job and dev endpoint
//! - [`etl`] - contract with the transform script
//! - [`query`] - Athena workgroup and named queries
//! - [`federation`] - DynamoDB federated query catalog
//! - [`network`] - VPC
//! - [`database`] - DynamoDB table and Aurora cluster
//! - [`extension`] - serializable extension list
//!
//! # Example
//!
//! ```ignore
//! let mut stack = DemoStack::new(props)?;
//! stack.with_athena(true)?.with_aurora()?;
//! let template = synth::synthesize(stack.graph(), &stack.stack_name())?;
//! ```

pub mod catalog;
mod compute;
pub mod database;
pub mod etl;
pub mod extension;
pub mod federation;
pub mod naming;
pub mod network;
pub mod query;
pub mod storage;

pub use extension::Extension;
pub use naming::{Namer, Scope};

use crate::dataset::DatasetFolders;
use crate::resource::{DeploymentGraph, ResourceRef};
use anyhow::{bail, Result};
use catalog::CatalogLayer;
use database::{AuroraCluster, Table};
use federation::Federation;
use network::Vpc;
use query::QueryLayer;
use serde_json::json;
use std::path::PathBuf;
use storage::StorageLayer;

/// Inputs of one deployment
#[derive(Debug, Clone)]
pub struct StackProps {
    pub demo_name: String,
    pub account: String,
    pub region: String,
    /// One subdirectory per dataset, copied to the raw bucket
    pub assets_dir: PathBuf,
    /// Glue scripts, copied to the scripts bucket
    pub scripts_dir: PathBuf,
    /// Dataset folder snapshot shared by every per-dataset fan-out
    pub datasets: DatasetFolders,
    pub max_azs: usize,
}

/// Stack context of one deployment
#[derive(Debug)]
pub struct DemoStack {
    namer: Namer,
    datasets: DatasetFolders,
    graph: DeploymentGraph,
    max_azs: usize,
    storage: StorageLayer,
    catalog: CatalogLayer,
    vpc: Option<Vpc>,
    dynamodb_table: Option<Table>,
    aurora_cluster: Option<AuroraCluster>,
    athena: Option<QueryLayer>,
    federation: Option<Federation>,
    glue_job: Option<ResourceRef>,
    dev_endpoint: Option<ResourceRef>,
    classifier_crawler: Option<ResourceRef>,
}

impl DemoStack {
    /// Declare the storage and catalog layers
    pub fn new(props: StackProps) -> Result<Self> {
        if props.max_azs == 0 {
            bail!("max_azs must be at least 1");
        }

        let namer = Namer::new(&props.demo_name, &props.account, &props.region);
        let mut graph = DeploymentGraph::new();

        let storage = storage::declare(&mut graph, &namer, &props.assets_dir, &props.scripts_dir)?;
        let catalog = catalog::declare(&mut graph, &namer, &storage, &props.datasets)?;

        graph.add_output("RawBucketName", None, storage.raw.name_ref())?;
        graph.add_output("ProcessedBucketName", None, storage.processed.name_ref())?;
        graph.add_output("ScriptsBucketName", None, storage.scripts.name_ref())?;
        graph.add_output("RawDatabaseName", None, json!(catalog.raw_db.name))?;
        graph.add_output("ProcessedDatabaseName", None, json!(catalog.processed_db.name))?;

        tracing::info!(
            "Stack {} created for {}/{} with {} datasets",
            props.demo_name,
            props.account,
            props.region,
            props.datasets.len()
        );

        Ok(Self {
            namer,
            datasets: props.datasets,
            graph,
            max_azs: props.max_azs,
            storage,
            catalog,
            vpc: None,
            dynamodb_table: None,
            aurora_cluster: None,
            athena: None,
            federation: None,
            glue_job: None,
            dev_endpoint: None,
            classifier_crawler: None,
        })
    }

    /// Name a resource consistently; see [`Namer::name_resource`]
    pub fn name_resource(&self, logical_name: &str, is_global_resource: bool, delimiter: &str) -> String {
        self.namer
            .name_resource(logical_name, Scope::from(is_global_resource), delimiter)
    }

    /// CloudFormation stack name
    pub fn stack_name(&self) -> String {
        format!("demo-data-{}", self.namer.demo_name())
    }

    pub fn namer(&self) -> &Namer {
        &self.namer
    }

    pub fn datasets(&self) -> &DatasetFolders {
        &self.datasets
    }

    pub fn graph(&self) -> &DeploymentGraph {
        &self.graph
    }

    pub fn into_graph(self) -> DeploymentGraph {
        self.graph
    }

    pub fn storage(&self) -> &StorageLayer {
        &self.storage
    }

    pub fn catalog(&self) -> &CatalogLayer {
        &self.catalog
    }

    pub fn vpc(&self) -> Option<&Vpc> {
        self.vpc.as_ref()
    }

    pub fn dynamodb_table(&self) -> Option<&Table> {
        self.dynamodb_table.as_ref()
    }

    pub fn aurora_cluster(&self) -> Option<&AuroraCluster> {
        self.aurora_cluster.as_ref()
    }

    pub fn athena(&self) -> Option<&QueryLayer> {
        self.athena.as_ref()
    }

    pub fn federation(&self) -> Option<&Federation> {
        self.federation.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn props(datasets: &[&str]) -> StackProps {
        StackProps {
            demo_name: "workshop".to_string(),
            account: "111122223333".to_string(),
            region: "eu-central-1".to_string(),
            assets_dir: PathBuf::from("/nonexistent/assets"),
            scripts_dir: PathBuf::from("/nonexistent/scripts"),
            datasets: DatasetFolders::new(datasets.iter().copied()),
            max_azs: network::DEFAULT_MAX_AZS,
        }
    }

    fn stack(datasets: &[&str]) -> DemoStack {
        DemoStack::new(props(datasets)).unwrap()
    }

    #[test]
    fn test_base_stack() {
        let stack = stack(&["name.basics", "title.basics"]);
        let graph = stack.graph();

        assert_eq!(graph.count_of_kind("s3-bucket"), 3);
        assert_eq!(graph.count_of_kind("glue-database"), 2);
        assert_eq!(graph.count_of_kind("glue-crawler"), 1);
        // Glue role plus the auto-delete and two deployment provider roles
        assert_eq!(graph.count_of_kind("iam-role"), 4);
        assert_eq!(graph.count_of_kind("s3-auto-delete-objects"), 3);
        assert_eq!(stack.catalog().raw_db.name, "demo_database_raw_workshop");

        let crawler = graph.get(&stack.catalog().crawler).unwrap();
        assert_eq!(
            crawler.properties["Targets"]["S3Targets"].as_array().unwrap().len(),
            2
        );
        assert!(crawler.depends_on.contains(&stack.storage().raw.resource.logical_id));
        assert!(crawler.depends_on.contains(&stack.catalog().glue_role.logical_id));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_name_resource_matches_namer() {
        let stack = stack(&[]);
        assert_eq!(
            stack.name_resource("raw-data-bucket", true, "-"),
            "demo-raw-data-bucket-111122223333-eu-central-1-workshop"
        );
        assert_eq!(stack.stack_name(), "demo-data-workshop");
    }

    #[test]
    fn test_zero_azs_rejected() {
        let mut p = props(&[]);
        p.max_azs = 0;
        assert!(DemoStack::new(p).is_err());
    }

    #[test]
    fn test_athena_scenario() {
        let mut stack = stack(&["name.basics", "title.basics"]);
        stack.with_athena(false).unwrap();

        let graph = stack.graph();
        let athena = stack.athena().unwrap();
        assert_eq!(graph.count_of_kind("athena-workgroup"), 1);
        assert_eq!(graph.count_of_kind("athena-named-query"), 3);
        assert_eq!(athena.preview_queries.len(), 2);

        for query in graph.of_kind("athena-named-query") {
            assert!(
                query.depends_on.contains(&athena.workgroup.logical_id),
                "{} must depend on the workgroup",
                query.construct_id
            );
            assert_eq!(
                query.property_str("WorkGroup"),
                Some("demo_athena_workgroup_workshop")
            );
        }

        let names: Vec<&str> = athena
            .preview_queries
            .iter()
            .filter_map(|q| graph.get(q).and_then(|r| r.property_str("Name")))
            .collect();
        assert_eq!(
            names,
            vec![
                "demo_preview_imdb_dataset_name.basics_workshop",
                "demo_preview_imdb_dataset_title.basics_workshop"
            ]
        );

        let preview = graph.get(&athena.preview_queries[0]).unwrap();
        assert_eq!(
            preview.properties["QueryString"]["Fn::Join"][1][2],
            json!("\".\"with_classifier_name_basics\" LIMIT 10")
        );
        assert!(stack.federation().is_none());
        assert!(stack.dynamodb_table().is_none());
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_athena_with_federation_cascades_into_dynamodb() {
        let mut stack = stack(&["name.basics"]);
        stack.with_athena(true).unwrap();

        let graph = stack.graph();
        let federation = stack.federation().unwrap();
        assert_eq!(graph.count_of_kind("sam-application"), 1);
        assert_eq!(graph.count_of_kind("dynamodb-table"), 1);
        assert_eq!(graph.count_of_kind("s3-bucket"), 5);

        let catalog = graph.get(&federation.data_catalog).unwrap();
        assert!(catalog.depends_on.contains(&federation.connector.logical_id));
        assert_eq!(
            catalog.properties["Parameters"]["function"],
            json!("arn:aws:lambda:eu-central-1:111122223333:function:demo-dynamodb-catalog-workshop")
        );

        stack.with_dynamodb().unwrap();
        assert_eq!(stack.graph().count_of_kind("dynamodb-table"), 1);
        assert!(stack.graph().validate().is_ok());
    }

    #[test]
    fn test_athena_twice_is_idempotent() {
        let mut stack = stack(&["name.basics"]);
        stack.with_athena(true).unwrap().with_athena(true).unwrap();
        assert_eq!(stack.graph().count_of_kind("athena-workgroup"), 1);
        assert_eq!(stack.graph().count_of_kind("athena-named-query"), 2);
        assert_eq!(stack.graph().count_of_kind("athena-data-catalog"), 1);
    }

    #[test]
    fn test_athena_without_datasets_has_only_join_query() {
        let mut stack = stack(&[]);
        stack.with_athena(false).unwrap();
        assert_eq!(stack.graph().count_of_kind("athena-named-query"), 1);
    }

    #[test]
    fn test_aurora_twice_declares_one_vpc() {
        let mut stack = stack(&[]);
        stack.with_aurora().unwrap().with_aurora().unwrap();

        let graph = stack.graph();
        assert_eq!(graph.count_of_kind("ec2-vpc"), 1);
        assert_eq!(graph.count_of_kind("rds-db-cluster"), 1);
        assert_eq!(graph.count_of_kind("ec2-security-group-ingress"), 3);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_vpc_then_aurora_reuses_vpc() {
        let mut stack = stack(&[]);
        stack.with_vpc().unwrap().with_aurora().unwrap().with_vpc().unwrap();

        let graph = stack.graph();
        let vpc = stack.vpc().unwrap();
        assert_eq!(graph.count_of_kind("ec2-vpc"), 1);
        assert_eq!(graph.count_of_kind("ec2-subnet"), 9);
        assert_eq!(graph.count_of_kind("ec2-nat-gateway"), 1);
        assert_eq!(vpc.subnets().count(), 9);
        assert_eq!(vpc.public_subnets[0].cidr, "10.0.0.0/20");
        assert_eq!(vpc.isolated_subnets[2].cidr, "10.0.128.0/20");

        let subnet_group = graph.find("serverlessCluster/Subnets").unwrap();
        assert_eq!(subnet_group.properties["SubnetIds"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_dev_endpoint_without_vpc_omits_network() {
        let mut stack = stack(&[]);
        stack.with_dev_endpoint("203.0.113.7/32").unwrap();

        let graph = stack.graph();
        let endpoint = graph.find("MyCfnDevEndpoint").unwrap();
        assert!(!endpoint.properties.contains_key("SubnetId"));
        assert!(!endpoint.properties.contains_key("SecurityGroupIds"));
        assert_eq!(graph.count_of_kind("ec2-security-group"), 0);
    }

    #[test]
    fn test_dev_endpoint_with_vpc() {
        let mut stack = stack(&[]);
        stack.with_vpc().unwrap().with_dev_endpoint("203.0.113.7/32").unwrap();

        let graph = stack.graph();
        let endpoint = graph.find("MyCfnDevEndpoint").unwrap();
        let subnet = &stack.vpc().unwrap().public_subnets[0].resource;
        assert_eq!(endpoint.properties["SubnetId"], json!({ "Ref": subnet.logical_id }));
        let sg = graph.find("endpoint-sg").unwrap();
        assert_eq!(
            sg.properties["SecurityGroupIngress"][0]["CidrIp"],
            json!("203.0.113.7/32")
        );
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_dev_endpoint_with_vpc_rejects_bad_cidr() {
        let mut stack = stack(&[]);
        stack.with_vpc().unwrap();
        assert!(stack.with_dev_endpoint("203.0.113.7").is_err());
    }

    #[test]
    fn test_glue_job() {
        let mut stack = stack(&["name.basics"]);
        stack.with_glue_job(etl::DEFAULT_DATASET_FILE).unwrap();
        stack.with_glue_job("title.basics/title.basics.tsv").unwrap();

        let graph = stack.graph();
        assert_eq!(graph.count_of_kind("glue-job"), 1);
        let job = graph.find("glue-job-etl").unwrap();
        assert_eq!(job.property_str("Name"), Some("demo-s3-to-parquet-workshop"));
        assert_eq!(
            job.properties["DefaultArguments"]["--dataset_path"],
            json!("name.basics")
        );
        assert_eq!(
            job.properties["DefaultArguments"]["--job-bookmark-option"],
            json!("job-bookmark-disable")
        );
        assert!(graph.outputs().contains_key("PartitionedOutputUri"));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_custom_classifier_and_admin_privileges() {
        let mut stack = stack(&["name.basics", "title.basics"]);
        stack
            .with_custom_classifier()
            .unwrap()
            .with_custom_classifier()
            .unwrap()
            .with_admin_privileges()
            .unwrap()
            .with_admin_privileges()
            .unwrap();

        let graph = stack.graph();
        assert_eq!(graph.count_of_kind("glue-classifier"), 1);
        assert_eq!(graph.count_of_kind("glue-crawler"), 2);

        let crawler = graph.find("DemoAthenaCfnCrawlerWithClassifier").unwrap();
        assert_eq!(crawler.property_str("TablePrefix"), Some("with_classifier_"));
        let classifier = graph.find("MyCfnClassifier").unwrap();
        assert!(crawler.depends_on.contains(&classifier.logical_id));

        let role = graph.get(&stack.catalog().glue_role).unwrap();
        let policies = role.properties["ManagedPolicyArns"].as_array().unwrap();
        assert_eq!(policies.len(), 2);
        assert!(policies.contains(&json!("arn:aws:iam::aws:policy/AdministratorAccess")));
    }

    #[test]
    fn test_apply_extension_list() {
        let mut stack = stack(&["name.basics"]);
        for extension in [
            Extension::Aurora,
            Extension::Vpc,
            Extension::Athena {
                include_federated_query_infra: true,
            },
            Extension::Dynamodb,
        ] {
            stack.apply(&extension).unwrap();
        }

        let graph = stack.graph();
        assert_eq!(graph.count_of_kind("ec2-vpc"), 1);
        assert_eq!(graph.count_of_kind("dynamodb-table"), 1);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_bucket_deployment_hashes_assets() {
        let assets = tempfile::tempdir().unwrap();
        fs::create_dir(assets.path().join("name.basics")).unwrap();
        fs::write(assets.path().join("name.basics/name.basics.tsv"), "nconst\n").unwrap();

        let mut p = props(&["name.basics"]);
        p.assets_dir = assets.path().to_path_buf();
        let stack = DemoStack::new(p).unwrap();

        let deployment = stack
            .graph()
            .find("demo_athena_bucket_deployment_populate_bucket_with_datasets")
            .unwrap();
        let hash = crate::dataset::fingerprint_directory(assets.path()).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(
            deployment.properties["SourceObjectKeys"],
            serde_json::json!([format!("{}.zip", hash)])
        );

        let asset = stack.graph().assets().find(|a| a.id == hash).unwrap();
        assert_eq!(asset.source_path, assets.path());
    }
}
