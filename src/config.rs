//! Configuration Management
//!
//! Handles persistent configuration storage for demo-data.

use crate::aws::env;
use crate::stack::network::DEFAULT_MAX_AZS;
use crate::stack::Extension;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Demo name used when none is configured
pub const DEFAULT_DEMO_NAME: &str = "workshop";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Distinguishes deployments in one account and region
    #[serde(default)]
    pub demo_name: Option<String>,
    /// Target account id
    #[serde(default)]
    pub account: Option<String>,
    /// Target region
    #[serde(default)]
    pub region: Option<String>,
    /// Dataset folders root
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,
    /// Glue scripts directory
    #[serde(default)]
    pub scripts_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_azs: Option<usize>,
    /// Extensions applied when the command line names none
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<Extension>,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("demo-data").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from an explicit file, YAML or JSON by extension
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))?
        };
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Get effective demo name (config > default)
    pub fn effective_demo_name(&self) -> String {
        self.demo_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_DEMO_NAME.to_string())
    }

    /// Get effective account (config > environment)
    pub fn effective_account(&self) -> Option<String> {
        self.account.clone().or_else(env::get_default_account)
    }

    /// Get effective region (config > environment > AWS CLI profile)
    pub fn effective_region(&self) -> Option<String> {
        self.region.clone().or_else(env::get_default_region)
    }

    pub fn effective_assets_dir(&self) -> PathBuf {
        self.assets_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("assets"))
    }

    pub fn effective_scripts_dir(&self) -> PathBuf {
        self.scripts_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("glue_scripts").join("scripts"))
    }

    pub fn effective_max_azs(&self) -> usize {
        self.max_azs.unwrap_or(DEFAULT_MAX_AZS)
    }
}
