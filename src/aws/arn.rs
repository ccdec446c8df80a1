//! ARN and URI builders
//!
//! String helpers for the identifiers the stack writes into resource
//! properties.

use crate::resource::{intrinsic, ResourceRef};
use serde_json::{json, Value};

/// Serverless application repository entry for the Athena DynamoDB connector
pub const DYNAMODB_CONNECTOR_APPLICATION_ID: &str =
    "arn:aws:serverlessrepo:us-east-1:292517598671:applications/AthenaDynamoDBConnector";

/// Pinned connector version
pub const DYNAMODB_CONNECTOR_VERSION: &str = "2022.22.1";

/// ARN of an AWS managed IAM policy, e.g. `service-role/AWSGlueServiceRole`
pub fn managed_policy_arn(name: &str) -> String {
    format!("arn:aws:iam::aws:policy/{}", name)
}

/// ARN of a Lambda function in a concrete account and region
pub fn lambda_function_arn(region: &str, account: &str, function_name: &str) -> String {
    format!(
        "arn:aws:lambda:{}:{}:function:{}",
        region, account, function_name
    )
}

/// `s3://<bucket>[/<key>]` for a declared bucket.
///
/// The bucket name is taken from the bucket's `Ref`, so any resource using
/// the URL depends on the bucket.
pub fn s3_url_for_object(bucket: &ResourceRef, key: Option<&str>) -> Value {
    let mut parts = vec![json!("s3://"), intrinsic::reference(bucket)];
    if let Some(key) = key {
        parts.push(json!(format!("/{}", key.trim_start_matches('/'))));
    }
    intrinsic::join("", parts)
}

/// Append a literal suffix to a URL built by [`s3_url_for_object`]
pub fn append_path(url: &Value, suffix: &str) -> Value {
    intrinsic::join("", vec![url.clone(), json!(suffix)])
}

/// Service principal for an AWS service, e.g. `glue.amazonaws.com`
pub fn service_principal(service: &str) -> String {
    format!("{}.amazonaws.com", service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_policy_arn() {
        assert_eq!(
            managed_policy_arn("AdministratorAccess"),
            "arn:aws:iam::aws:policy/AdministratorAccess"
        );
    }

    #[test]
    fn test_lambda_function_arn() {
        assert_eq!(
            lambda_function_arn("eu-central-1", "111122223333", "demo-dynamodb-catalog-workshop"),
            "arn:aws:lambda:eu-central-1:111122223333:function:demo-dynamodb-catalog-workshop"
        );
    }

    #[test]
    fn test_s3_url_for_object() {
        let bucket = ResourceRef {
            construct_id: "scripts".into(),
            logical_id: "Scripts".into(),
        };
        assert_eq!(
            s3_url_for_object(&bucket, Some("/scripts/job.py")),
            json!({ "Fn::Join": ["", ["s3://", { "Ref": "Scripts" }, "/scripts/job.py"]] })
        );
        assert_eq!(
            s3_url_for_object(&bucket, None),
            json!({ "Fn::Join": ["", ["s3://", { "Ref": "Scripts" }]] })
        );
    }
}
