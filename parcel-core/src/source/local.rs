//! Local filesystem package source
//!
//! Serves packages from a directory of seed artifacts. The catalog comes
//! from `index.json` at the root, or from scanning package directories when
//! no index exists. Index and loaded packages stay cached until
//! `clear_cache` is called.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{PackageSource, PackageSourceConfig};
use crate::error::{PackageError, Result};
use crate::package::seed;
use crate::package::{PackageData, PackageMetadata};

/// Shape of `index.json`
#[derive(Debug, Deserialize)]
struct LocalIndex {
    #[serde(default)]
    packages: Vec<PackageMetadata>,
}

/// Package source backed by a local directory
pub struct LocalPackageSource {
    config: PackageSourceConfig,
    root: PathBuf,
    index_cache: RwLock<Option<Vec<PackageMetadata>>>,
    package_cache: RwLock<HashMap<String, PackageData>>,
}

impl LocalPackageSource {
    pub fn new(config: PackageSourceConfig) -> Self {
        let root = PathBuf::from(&config.url);
        Self {
            config,
            root,
            index_cache: RwLock::new(None),
            package_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Root directory packages are read from
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, package_id: &str) -> PathBuf {
        self.root.join(package_id)
    }

    async fn read_index(&self) -> anyhow::Result<Vec<PackageMetadata>> {
        let index_path = self.root.join(seed::INDEX_FILE);
        if let Some(index) = seed::read_json::<LocalIndex>(&index_path).await? {
            debug!(
                "Read {} entries from {}",
                index.packages.len(),
                index_path.display()
            );
            return Ok(index.packages);
        }

        debug!(
            "No index at {}, scanning package directories",
            index_path.display()
        );
        self.scan_packages().await
    }

    /// Build a catalog from `*/seed/metadata.json` when there is no index
    async fn scan_packages(&self) -> anyhow::Result<Vec<PackageMetadata>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut packages = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match seed::read_metadata(&entry.path()).await {
                Ok(Some(mut metadata)) => {
                    if metadata.package_id.is_empty() {
                        metadata.package_id = dir_name;
                    }
                    packages.push(metadata);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping package directory '{}': {:#}", dir_name, e),
            }
        }

        packages.sort_by(|a, b| a.package_id.cmp(&b.package_id));
        Ok(packages)
    }

    async fn find_entry(&self, package_id: &str) -> Option<PackageMetadata> {
        self.fetch_index()
            .await
            .into_iter()
            .find(|entry| entry.package_id == package_id)
    }

    async fn read_package(&self, entry: PackageMetadata) -> anyhow::Result<PackageData> {
        let package_dir = self.package_dir(&entry.package_id);

        let metadata = match seed::read_metadata(&package_dir).await? {
            Some(mut metadata) => {
                metadata.package_id = entry.package_id.clone();
                metadata.with_source(&self.config.id)
            }
            None => entry,
        };

        let components = seed::read_components(&package_dir)
            .await?
            .unwrap_or_default();
        let examples = seed::read_examples(&package_dir).await?;
        let scripts = seed::read_legacy_script(&package_dir).await?;
        let script_files = seed::read_script_files(&package_dir).await?;

        Ok(PackageData {
            metadata,
            components,
            scripts,
            script_files,
            examples,
        })
    }
}

#[async_trait]
impl PackageSource for LocalPackageSource {
    fn config(&self) -> &PackageSourceConfig {
        &self.config
    }

    async fn fetch_index(&self) -> Vec<PackageMetadata> {
        if let Some(cached) = self.index_cache.read().await.as_ref() {
            return cached.clone();
        }

        match self.read_index().await {
            Ok(entries) => {
                let entries: Vec<PackageMetadata> = entries
                    .into_iter()
                    .map(|entry| entry.with_source(&self.config.id))
                    .collect();
                *self.index_cache.write().await = Some(entries.clone());
                entries
            }
            Err(e) => {
                PackageError::source_unavailable(&self.config.id, format!("{e:#}"))
                    .log_if_source_failure();
                Vec::new()
            }
        }
    }

    async fn load_package(&self, package_id: &str) -> Result<Option<PackageData>> {
        if let Some(cached) = self.package_cache.read().await.get(package_id) {
            return Ok(Some(cached.clone()));
        }

        let Some(entry) = self.find_entry(package_id).await else {
            debug!(
                "Package '{}' not in local source '{}'",
                package_id, self.config.id
            );
            return Ok(None);
        };

        let data = self
            .read_package(entry)
            .await
            .map_err(|e| PackageError::source_unavailable(&self.config.id, format!("{e:#}")))?;

        self.package_cache
            .write()
            .await
            .insert(package_id.to_string(), data.clone());
        Ok(Some(data))
    }

    async fn get_versions(&self, package_id: &str) -> Result<Vec<String>> {
        // A local directory holds exactly one version of each package
        Ok(self
            .find_entry(package_id)
            .await
            .map(|entry| vec![entry.version])
            .unwrap_or_default())
    }

    async fn clear_cache(&self) {
        *self.index_cache.write().await = None;
        self.package_cache.write().await.clear();
    }
}
