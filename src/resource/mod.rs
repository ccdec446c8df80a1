//! Resource abstraction layer
//!
//! This module provides a data-driven approach to declaring AWS resources.
//! Resource kinds are loaded from JSON files at compile time, so adding a
//! new kind only needs a registry entry.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and caches resource kind definitions from embedded JSON
//! - [`graph`] - Declared resources and their dependency edges
//! - [`intrinsic`] - `Ref` / `Fn::GetAtt` / `Fn::Join` builders and reference scanning
//!
//! # Resource Definitions
//!
//! Kinds are defined in JSON files under `src/resources/`:
//! - `storage.json` - S3 buckets, bucket policies, deployments and auto-delete
//! - `iam.json` - roles and policies
//! - `glue.json` - databases, crawlers, classifiers, jobs, dev endpoints
//! - `athena.json` - workgroups, named queries, data catalogs, SAM connector
//! - `network.json` - VPC plumbing
//! - `database.json` - DynamoDB, Aurora, secrets
//! - `lambda.json` - provider functions behind custom resources
//!
//! # Example
//!
//! ```ignore
//! use crate::resource::{intrinsic, DeploymentGraph};
//!
//! let mut graph = DeploymentGraph::new();
//! let bucket = graph.add("raw", "s3-bucket", json!({ "BucketName": "demo-raw" }))?;
//! graph.add("crawler", "glue-crawler", json!({ "Path": intrinsic::reference(&bucket) }))?;
//! ```

mod graph;
pub mod intrinsic;
mod registry;

pub use graph::*;
pub use registry::*;
