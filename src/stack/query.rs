//! Query layer: Athena workgroup and named queries

use super::catalog::classified_table_name;
use super::storage::{declare_bucket, Bucket};
use super::DemoStack;
use crate::resource::{intrinsic, ResourceRef};
use anyhow::Result;
use serde_json::json;

/// Key prefix of query results inside the results bucket
pub const S3_QUERY_DIRECTORY: &str = "athena_queries";

const JOIN_QUERY: &str = "SELECT with_classifier_title_basics.primarytitle, with_classifier_title_ratings.averagerating\n\
FROM with_classifier_title_ratings\n\
INNER JOIN with_classifier_title_basics ON with_classifier_title_ratings.tconst=with_classifier_title_basics.tconst";

/// The declared Athena resources
#[derive(Debug, Clone)]
pub struct QueryLayer {
    pub results_bucket: Bucket,
    pub workgroup: ResourceRef,
    pub workgroup_name: String,
    pub preview_queries: Vec<ResourceRef>,
    pub join_query: ResourceRef,
}

/// Logical name of the preview query for a dataset folder
pub fn preview_query_logical_name(folder: &str) -> String {
    format!("preview_imdb_dataset_{}", folder)
}

impl DemoStack {
    /// Adds a workgroup and named queries over the crawled datasets, and
    /// optionally the federated query infrastructure for DynamoDB
    pub fn with_athena(&mut self, include_federated_query_infra: bool) -> Result<&mut Self> {
        if self.athena.is_none() {
            self.declare_query_layer()?;
        } else {
            tracing::debug!("Athena workgroup already declared");
        }

        if include_federated_query_infra {
            self.declare_federation()?;
        }
        Ok(self)
    }

    fn declare_query_layer(&mut self) -> Result<()> {
        let results_bucket = declare_bucket(
            &mut self.graph,
            "athena_querie_results",
            self.namer.global_name("athena-query-results"),
        )?;

        let workgroup_name = self.namer.snake_name("athena_workgroup");
        let workgroup = self.graph.add(
            "demoAthenaWorkgroup",
            "athena-workgroup",
            json!({
                "Name": workgroup_name,
                "RecursiveDeleteOption": true,
                "WorkGroupConfiguration": {
                    "ResultConfiguration": {
                        "OutputLocation": results_bucket.s3_url(Some(S3_QUERY_DIRECTORY))
                    }
                }
            }),
        )?;

        let raw_db = &self.catalog.raw_db;
        let mut preview_queries = Vec::with_capacity(self.datasets.len());
        for folder in self.datasets.iter() {
            let query_string = intrinsic::join(
                "",
                vec![
                    json!("SELECT * FROM \""),
                    raw_db.name_ref(),
                    json!(format!("\".\"{}\" LIMIT 10", classified_table_name(folder))),
                ],
            );
            let query = self.graph.add(
                &format!("demoAthenaQuery{}", folder),
                "athena-named-query",
                json!({
                    "Database": raw_db.name_ref(),
                    "QueryString": query_string,
                    "Description": "Preview IMDB Dataset",
                    "Name": self.namer.snake_name(&preview_query_logical_name(folder)),
                    "WorkGroup": workgroup_name
                }),
            )?;
            // WorkGroup holds the plain name, so the edge must be explicit
            self.graph.add_dependency(&query, &workgroup)?;
            preview_queries.push(query);
        }

        let join_query = self.graph.add(
            "demoAthenaJoin",
            "athena-named-query",
            json!({
                "Database": raw_db.name_ref(),
                "QueryString": JOIN_QUERY,
                "Description": "Joins two IMDB datasets",
                "Name": self.namer.snake_name("join_imdb_datasets"),
                "WorkGroup": workgroup_name
            }),
        )?;
        self.graph.add_dependency(&join_query, &workgroup)?;

        self.graph.add_output(
            "AthenaWorkgroupName",
            Some("Workgroup holding the demo queries"),
            json!(workgroup_name),
        )?;

        tracing::info!(
            "Athena workgroup {} declared with {} preview queries",
            workgroup_name,
            preview_queries.len()
        );

        self.athena = Some(QueryLayer {
            results_bucket,
            workgroup,
            workgroup_name,
            preview_queries,
            join_query,
        });
        Ok(())
    }
}
