//! Compose the AWS data-analytics demo environment as a deployment graph and
//! synthesize it into a CloudFormation template.

pub mod aws;
pub mod config;
pub mod dataset;
pub mod resource;
pub mod stack;
pub mod synth;

/// Version injected at compile time via DEMO_DATA_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("DEMO_DATA_VERSION") {
    Some(v) => v,
    None => "dev",
};
