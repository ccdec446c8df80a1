//! Contract with the managed transform job.
//!
//! The job reads a tab-separated file with a header row and the name-basics
//! schema, then writes it twice as Parquet: partitioned by `birthYear` and
//! unpartitioned.

use super::storage::{Bucket, DATA_FOLDER_PREFIX};
use crate::aws::arn;
use anyhow::{bail, Result};
use serde_json::{json, Map, Value};

/// Columns of the input file, in order
pub const INPUT_COLUMNS: [&str; 6] = [
    "nconst",
    "primaryName",
    "birthYear",
    "deathYear",
    "primaryProfession",
    "knownForTitles",
];

pub const PARTITION_COLUMN: &str = "birthYear";

/// Script the job runs, relative to the scripts prefix
pub const SCRIPT_NAME: &str = "csv_to_parquet.py";

/// Dataset the job transforms when none is given
pub const DEFAULT_DATASET_FILE: &str = "name.basics/name.basics.tsv";

/// The three named arguments the transform script reads
#[derive(Debug, Clone)]
pub struct TransformArgs {
    pub raw_dataset_uri: Value,
    pub target_dataset_uri: Value,
    pub dataset_path: String,
}

/// Dataset folder of a file path: `name.basics/name.basics.tsv` -> `name.basics`
pub fn dataset_path_of(path_to_file: &str) -> Result<String> {
    match path_to_file.trim_start_matches('/').split('/').next() {
        Some(folder) if !folder.is_empty() => Ok(folder.to_string()),
        _ => bail!("Dataset file path {:?} has no dataset folder", path_to_file),
    }
}

impl TransformArgs {
    pub fn new(raw: &Bucket, processed: &Bucket, path_to_file: &str) -> Result<Self> {
        let path_to_file = path_to_file.trim_start_matches('/');
        Ok(Self {
            raw_dataset_uri: arn::append_path(
                &raw.s3_url(None),
                &format!("/{}/{}", DATA_FOLDER_PREFIX, path_to_file),
            ),
            target_dataset_uri: processed.s3_url(None),
            dataset_path: dataset_path_of(path_to_file)?,
        })
    }

    /// `--name value` pairs merged into the job's default arguments
    pub fn to_default_arguments(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("--raw_dataset_uri".to_string(), self.raw_dataset_uri.clone());
        args.insert(
            "--target_dataset_uri".to_string(),
            self.target_dataset_uri.clone(),
        );
        args.insert("--dataset_path".to_string(), json!(self.dataset_path));
        args
    }

    /// `<target>/partitioned/<dataset_path>`, partitioned by [`PARTITION_COLUMN`]
    pub fn partitioned_output_uri(&self) -> Value {
        arn::append_path(
            &self.target_dataset_uri,
            &format!("/partitioned/{}", self.dataset_path),
        )
    }

    /// `<target>/unpartitioned/<dataset_path>`
    pub fn unpartitioned_output_uri(&self) -> Value {
        arn::append_path(
            &self.target_dataset_uri,
            &format!("/unpartitioned/{}", self.dataset_path),
        )
    }
}
