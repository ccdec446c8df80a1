//! Catalog layer: Glue databases, the Glue role and the crawlers

use super::naming::Namer;
use super::storage::{Bucket, StorageLayer, DATA_FOLDER_PREFIX};
use super::DemoStack;
use crate::aws::arn;
use crate::dataset::DatasetFolders;
use crate::resource::{intrinsic, DeploymentGraph, ResourceRef};
use anyhow::Result;
use serde_json::{json, Value};

/// Base name of the raw and processed databases
pub const GLUE_DATABASE_NAME: &str = "database";

/// Table prefix of the crawler that uses the header classifier
pub const CLASSIFIER_TABLE_PREFIX: &str = "with_classifier_";

const GLUE_SERVICE_ROLE_POLICY: &str = "service-role/AWSGlueServiceRole";
const ADMIN_POLICY: &str = "AdministratorAccess";

/// A declared Glue database and its (lowercase) name
#[derive(Debug, Clone)]
pub struct Database {
    pub resource: ResourceRef,
    pub name: String,
}

impl Database {
    /// `{"Ref": <database>}`, which resolves to the database name
    pub fn name_ref(&self) -> Value {
        intrinsic::reference(&self.resource)
    }
}

/// The always-present catalog resources
#[derive(Debug, Clone)]
pub struct CatalogLayer {
    pub raw_db: Database,
    pub processed_db: Database,
    pub glue_role: ResourceRef,
    pub crawler: ResourceRef,
}

fn declare_database(graph: &mut DeploymentGraph, construct_id: &str, name: String) -> Result<Database> {
    let resource = graph.add(
        construct_id,
        "glue-database",
        json!({
            "CatalogId": intrinsic::pseudo("AccountId"),
            "DatabaseInput": { "Name": name }
        }),
    )?;
    Ok(Database { resource, name })
}

fn declare_glue_role(graph: &mut DeploymentGraph, namer: &Namer) -> Result<ResourceRef> {
    graph.add(
        "demoAthenaGlueRole",
        "iam-role",
        json!({
            "RoleName": namer.global_name("glue-role"),
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": { "Service": arn::service_principal("glue") }
                }]
            },
            "ManagedPolicyArns": [arn::managed_policy_arn(GLUE_SERVICE_ROLE_POLICY)],
            "Policies": [{
                "PolicyName": "demoAthenaS3BucketAccess",
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": [
                            "s3:PutObject",
                            "s3:GetObject",
                            "s3:ListBucket",
                            "s3:DeleteObject"
                        ],
                        "Effect": "Allow",
                        "Resource": "*"
                    }]
                }
            }]
        }),
    )
}

/// One S3 target per dataset folder: `s3://<raw bucket>/raw/<folder>`
pub(crate) fn s3_targets(raw: &Bucket, datasets: &DatasetFolders) -> Vec<Value> {
    datasets
        .iter()
        .map(|folder| {
            json!({
                "Path": arn::append_path(&raw.s3_url(None), &format!("/{}/{}", DATA_FOLDER_PREFIX, folder))
            })
        })
        .collect()
}

struct CrawlerSpec<'a> {
    construct_id: &'a str,
    name: String,
    table_prefix: &'a str,
    classifiers: Vec<Value>,
}

fn declare_crawler(
    graph: &mut DeploymentGraph,
    spec: CrawlerSpec<'_>,
    role: &ResourceRef,
    raw: &Bucket,
    raw_db: &Database,
    datasets: &DatasetFolders,
) -> Result<ResourceRef> {
    let mut properties = json!({
        "Name": spec.name,
        "Role": intrinsic::get_att(role, "Arn"),
        "DatabaseName": raw_db.name_ref(),
        "TablePrefix": spec.table_prefix,
        "Targets": { "S3Targets": s3_targets(raw, datasets) }
    });
    if !spec.classifiers.is_empty() {
        if let Value::Object(map) = &mut properties {
            map.insert("Classifiers".to_string(), Value::Array(spec.classifiers));
        }
    }

    graph.add(spec.construct_id, "glue-crawler", properties)
}

/// Declare the databases, the Glue role and the crawler without classifier
pub(super) fn declare(
    graph: &mut DeploymentGraph,
    namer: &Namer,
    storage: &StorageLayer,
    datasets: &DatasetFolders,
) -> Result<CatalogLayer> {
    let raw_db = declare_database(
        graph,
        "glue-default-raw-db",
        namer
            .snake_name(&format!("{}_raw", GLUE_DATABASE_NAME))
            .to_lowercase(),
    )?;
    let processed_db = declare_database(
        graph,
        "glue-default-processed-db",
        namer
            .snake_name(&format!("{}_processed", GLUE_DATABASE_NAME))
            .to_lowercase(),
    )?;

    let glue_role = declare_glue_role(graph, namer)?;

    let crawler = declare_crawler(
        graph,
        CrawlerSpec {
            construct_id: "DemoAthenaCfnCrawlerWithoutClassifier",
            name: namer.name("crawler-without-classifier"),
            table_prefix: "",
            classifiers: Vec::new(),
        },
        &glue_role,
        &storage.raw,
        &raw_db,
        datasets,
    )?;

    tracing::info!(
        "Catalog layer declared: {}, {} with {} crawler targets",
        raw_db.name,
        processed_db.name,
        datasets.len()
    );

    Ok(CatalogLayer {
        raw_db,
        processed_db,
        glue_role,
        crawler,
    })
}

/// Name of the table the classifier crawler creates for a dataset folder
pub fn classified_table_name(folder: &str) -> String {
    format!("{}{}", CLASSIFIER_TABLE_PREFIX, folder.replace('.', "_"))
}

impl DemoStack {
    /// Adds a classifier for string-only datasets plus a crawler using it.
    ///
    /// The classifier assumes a header row is present, which the built-in
    /// classifiers miss when every column is a string.
    pub fn with_custom_classifier(&mut self) -> Result<&mut Self> {
        if self.classifier_crawler.is_some() {
            tracing::debug!("Custom classifier already declared");
            return Ok(self);
        }

        let classifier = self.graph.add(
            "MyCfnClassifier",
            "glue-classifier",
            json!({
                "CsvClassifier": {
                    "AllowSingleColumn": false,
                    "ContainsHeader": "PRESENT",
                    "Delimiter": "\t",
                    "DisableValueTrimming": false,
                    "Name": self.namer.name("contains-header-classifier"),
                    "QuoteSymbol": "'"
                }
            }),
        )?;

        let crawler = declare_crawler(
            &mut self.graph,
            CrawlerSpec {
                construct_id: "DemoAthenaCfnCrawlerWithClassifier",
                name: self.namer.name("crawler-with-classifier"),
                table_prefix: CLASSIFIER_TABLE_PREFIX,
                classifiers: vec![intrinsic::reference(&classifier)],
            },
            &self.catalog.glue_role,
            &self.storage.raw,
            &self.catalog.raw_db,
            &self.datasets,
        )?;

        tracing::info!("Custom classifier and crawler declared");
        self.classifier_crawler = Some(crawler);
        Ok(self)
    }

    /// Adds admin privileges to the Glue role
    pub fn with_admin_privileges(&mut self) -> Result<&mut Self> {
        let admin = Value::String(arn::managed_policy_arn(ADMIN_POLICY));
        let properties = self.graph.properties_mut(&self.catalog.glue_role)?;

        let policies = properties
            .entry("ManagedPolicyArns")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(arns) = policies {
            if arns.contains(&admin) {
                tracing::debug!("Glue role already has {}", ADMIN_POLICY);
            } else {
                arns.push(admin);
                tracing::info!("Attached {} to the Glue role", ADMIN_POLICY);
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classified_table_name() {
        assert_eq!(classified_table_name("name.basics"), "with_classifier_name_basics");
        assert_eq!(classified_table_name("ratings"), "with_classifier_ratings");
    }

    #[test]
    fn test_s3_targets_one_per_folder() {
        let raw = Bucket {
            resource: ResourceRef {
                construct_id: "raw".into(),
                logical_id: "Raw".into(),
            },
            name: "demo-raw".into(),
        };
        let datasets = DatasetFolders::new(["name.basics", "title.basics"]);
        let targets = s3_targets(&raw, &datasets);

        assert_eq!(targets.len(), 2);
        assert_eq!(
            targets[0]["Path"],
            json!({ "Fn::Join": ["", [
                { "Fn::Join": ["", ["s3://", { "Ref": "Raw" }]] },
                "/raw/name.basics"
            ]] })
        );
    }

    #[test]
    fn test_s3_targets_empty_for_no_datasets() {
        let raw = Bucket {
            resource: ResourceRef {
                construct_id: "raw".into(),
                logical_id: "Raw".into(),
            },
            name: "demo-raw".into(),
        };
        assert!(s3_targets(&raw, &DatasetFolders::default()).is_empty());
    }
}
