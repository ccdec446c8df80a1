//! AWS identifiers
//!
//! - [`env`] - account and region resolution from the environment and AWS CLI config
//! - [`arn`] - ARN, S3 URI and principal builders

pub mod arn;
pub mod env;
