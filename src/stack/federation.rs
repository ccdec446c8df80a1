//! Federated query infrastructure: Athena querying DynamoDB through the
//! serverless connector

use super::storage::{declare_bucket, Bucket};
use super::DemoStack;
use crate::aws::arn;
use crate::resource::ResourceRef;
use anyhow::Result;
use serde_json::json;

/// Key prefix the connector spills to
const SPILL_PREFIX: &str = "athena-spill";

/// The declared federation resources
#[derive(Debug, Clone)]
pub struct Federation {
    pub spill_bucket: Bucket,
    pub connector: ResourceRef,
    pub data_catalog: ResourceRef,
    /// Name of the connector Lambda, also the Athena catalog name it serves
    pub catalog_name: String,
}

impl DemoStack {
    /// Declares the spill bucket, the DynamoDB connector and the data catalog
    /// that routes queries to it, then makes sure a DynamoDB table exists
    pub(super) fn declare_federation(&mut self) -> Result<()> {
        if self.federation.is_some() {
            tracing::debug!("Federated query infrastructure already declared");
            return Ok(());
        }

        // Federated queries need a bucket for temporary spill storage
        let spill_bucket = declare_bucket(
            &mut self.graph,
            "athena_spill_bucket",
            self.namer.global_name("athena-spill-bucket"),
        )?;

        let catalog_name = self.namer.name("dynamodb-catalog");
        let connector = self.graph.add(
            "DynamdobConnectorLambda",
            "sam-application",
            json!({
                "Location": {
                    "ApplicationId": arn::DYNAMODB_CONNECTOR_APPLICATION_ID,
                    "SemanticVersion": arn::DYNAMODB_CONNECTOR_VERSION
                },
                "Parameters": {
                    "AthenaCatalogName": catalog_name,
                    "DisableSpillEncryption": "false",
                    "LambdaMemory": "3008",
                    "LambdaTimeout": "900",
                    "SpillBucket": spill_bucket.name_ref(),
                    "SpillPrefix": SPILL_PREFIX
                }
            }),
        )?;

        let function_arn = arn::lambda_function_arn(
            self.namer.region(),
            self.namer.account(),
            &catalog_name,
        );
        let data_catalog_name = self.namer.name("dynamodb");
        let data_catalog = self.graph.add(
            "DynamodbFederatedQueryCatalog",
            "athena-data-catalog",
            json!({
                "Name": data_catalog_name,
                "Type": "LAMBDA",
                "Description": "Uses federated query to query dynamodb",
                "Parameters": { "function": function_arn }
            }),
        )?;
        // The function ARN is a plain string published by the connector
        self.graph.add_dependency(&data_catalog, &connector)?;

        self.graph.add_output(
            "FederatedCatalogName",
            Some("Athena data catalog backed by DynamoDB"),
            json!(data_catalog_name),
        )?;

        tracing::info!("Federated query catalog {} declared", data_catalog_name);

        self.federation = Some(Federation {
            spill_bucket,
            connector,
            data_catalog,
            catalog_name,
        });

        // Add a DynamoDB table if not done so already
        if self.dynamodb_table.is_none() {
            self.with_dynamodb()?;
        }
        Ok(())
    }
}
