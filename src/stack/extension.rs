//! Serializable description of the optional stack extensions, so a
//! composition can be read from configuration

use super::etl::DEFAULT_DATASET_FILE;
use super::DemoStack;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One optional extension of the demo stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extension {
    Vpc,
    Dynamodb,
    Aurora,
    Athena {
        #[serde(default = "default_true")]
        include_federated_query_infra: bool,
    },
    CustomClassifier,
    AdminPrivileges,
    GlueJob {
        #[serde(default = "default_dataset_file")]
        path_to_file: String,
    },
    DevEndpoint {
        ip_address_to_whitelist: String,
    },
}

fn default_true() -> bool {
    true
}

fn default_dataset_file() -> String {
    DEFAULT_DATASET_FILE.to_string()
}

impl Extension {
    /// Composition used when nothing else is requested
    pub fn defaults() -> Vec<Extension> {
        vec![Extension::Athena {
            include_federated_query_infra: true,
        }]
    }
}

impl DemoStack {
    /// Apply one extension
    pub fn apply(&mut self, extension: &Extension) -> Result<&mut Self> {
        tracing::info!("Applying extension {:?}", extension);
        match extension {
            Extension::Vpc => self.with_vpc(),
            Extension::Dynamodb => self.with_dynamodb(),
            Extension::Aurora => self.with_aurora(),
            Extension::Athena {
                include_federated_query_infra,
            } => self.with_athena(*include_federated_query_infra),
            Extension::CustomClassifier => self.with_custom_classifier(),
            Extension::AdminPrivileges => self.with_admin_privileges(),
            Extension::GlueJob { path_to_file } => self.with_glue_job(path_to_file),
            Extension::DevEndpoint {
                ip_address_to_whitelist,
            } => self.with_dev_endpoint(ip_address_to_whitelist),
        }
    }
}
