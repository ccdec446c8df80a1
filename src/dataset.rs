//! Dataset Discovery
//!
//! Snapshot of the dataset folders under the local assets root. The snapshot
//! is taken once per build and drives every per-dataset fan-out (crawler
//! targets, preview queries), so all of them see the same folder set.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Names of the direct child directories of the assets root, sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetFolders(BTreeSet<String>);

impl DatasetFolders {
    pub fn new<I, S>(folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(folders.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, folder: &str) -> bool {
        self.0.contains(folder)
    }
}

/// List the dataset folders under `assets_root`.
///
/// A missing or empty root is not an error: it yields an empty set and the
/// per-dataset fan-outs declare nothing.
pub fn list_dataset_folders(assets_root: &Path) -> DatasetFolders {
    let entries = match std::fs::read_dir(assets_root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                "Assets directory {} not readable ({}), no datasets",
                assets_root.display(),
                e
            );
            return DatasetFolders::default();
        }
    };

    let mut folders = BTreeSet::new();
    for entry in entries.flatten() {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => {
                folders.insert(name);
            }
            Err(name) => {
                tracing::warn!("Skipping dataset folder with non UTF-8 name: {:?}", name);
            }
        }
    }

    if folders.is_empty() {
        tracing::warn!("No dataset folders under {}", assets_root.display());
    } else {
        tracing::info!(
            "Found {} dataset folders under {}",
            folders.len(),
            assets_root.display()
        );
    }

    DatasetFolders(folders)
}

/// BLAKE3 fingerprint of a directory tree: relative paths and file contents,
/// visited in sorted order. A missing directory fingerprints as empty.
pub fn fingerprint_directory(root: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    if root.is_dir() {
        hash_tree(root, root, &mut hasher)?;
    } else {
        tracing::warn!(
            "Asset directory {} does not exist, fingerprinting as empty",
            root.display()
        );
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn hash_tree(root: &Path, dir: &Path, hasher: &mut blake3::Hasher) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read asset directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list asset directory {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        if path.is_dir() {
            hash_tree(root, &path, hasher)?;
        } else {
            let content = std::fs::read(&path)
                .with_context(|| format!("Failed to read asset {}", path.display()))?;
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update(&[0]);
            hasher.update(&(content.len() as u64).to_le_bytes());
            hasher.update(&content);
        }
    }
    Ok(())
}
