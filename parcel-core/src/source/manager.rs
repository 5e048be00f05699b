//! Source manager - one merged catalog over many sources
//!
//! Holds the enabled package sources, fetches their indexes (bounded
//! parallel or serial), folds them into a single catalog in priority order
//! and caches the result until the set of sources changes.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::conflict::Candidate;
use super::{ConflictResolution, PackageSource, PackageSourceConfig};
use crate::config::PackageRepoConfig;
use crate::error::Result;
use crate::package::{PackageData, PackageMetadata, PackageRegistry};

/// Default bound on concurrent index fetches
pub const DEFAULT_MAX_PARALLEL_SOURCES: usize = 5;

/// Source manager behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceManagerConfig {
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,

    /// Fetch source indexes concurrently
    #[serde(default = "default_parallel_fetch")]
    pub parallel_fetch: bool,

    /// Upper bound on concurrent index fetches
    #[serde(default = "default_max_parallel_sources")]
    pub max_parallel_sources: usize,
}

fn default_parallel_fetch() -> bool {
    true
}

fn default_max_parallel_sources() -> usize {
    DEFAULT_MAX_PARALLEL_SOURCES
}

impl Default for SourceManagerConfig {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::default(),
            parallel_fetch: default_parallel_fetch(),
            max_parallel_sources: default_max_parallel_sources(),
        }
    }
}

/// A package in the merged catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedCatalogEntry {
    /// Metadata from the selected source
    #[serde(flatten)]
    pub metadata: PackageMetadata,

    /// Every source offering this package, in merge order
    pub available_sources: Vec<String>,

    /// The source chosen by the conflict policy
    pub selected_source: String,
}

impl MergedCatalogEntry {
    pub fn package_id(&self) -> &str {
        &self.metadata.package_id
    }
}

type MergedIndex = BTreeMap<String, MergedCatalogEntry>;

/// Manages package sources and their merged catalog
pub struct SourceManager {
    config: SourceManagerConfig,
    sources: HashMap<String, Arc<dyn PackageSource>>,
    merged: RwLock<Option<MergedIndex>>,
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new(SourceManagerConfig::default())
    }
}

impl SourceManager {
    pub fn new(config: SourceManagerConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
            merged: RwLock::new(None),
        }
    }

    /// Build a manager with one adapter per enabled source of a repository config
    pub fn from_repo_config(repo: &PackageRepoConfig) -> Result<Self> {
        repo.validate()?;

        let mut manager = Self::new(repo.manager_config());
        for source_config in repo.sources.iter().filter(|s| s.enabled) {
            if let Some(adapter) = super::from_config(source_config.clone()) {
                manager.add_source(Arc::from(adapter));
            }
        }

        info!(
            "Source manager ready with {} sources ({} conflict resolution)",
            manager.sources.len(),
            manager.config.conflict_resolution
        );
        Ok(manager)
    }

    pub fn config(&self) -> &SourceManagerConfig {
        &self.config
    }

    /// Add a source; disabled sources are ignored
    pub fn add_source(&mut self, source: Arc<dyn PackageSource>) {
        let source_config = source.config();
        if !source_config.enabled {
            debug!("Ignoring disabled source '{}'", source_config.id);
            return;
        }

        debug!(
            "Adding {} source '{}' (priority {})",
            source_config.source_type, source_config.id, source_config.priority
        );
        self.sources.insert(source_config.id.clone(), source);
        self.invalidate();
    }

    /// Remove a source by id, returning whether it existed
    pub fn remove_source(&mut self, source_id: &str) -> bool {
        let removed = self.sources.remove(source_id).is_some();
        if removed {
            self.invalidate();
        }
        removed
    }

    fn invalidate(&mut self) {
        *self.merged.get_mut() = None;
    }

    pub fn get_source(&self, source_id: &str) -> Option<Arc<dyn PackageSource>> {
        self.sources.get(source_id).cloned()
    }

    pub fn sources(&self) -> Vec<Arc<dyn PackageSource>> {
        self.sources.values().cloned().collect()
    }

    /// Sources sorted ascending by priority (ties by id)
    pub fn sources_by_priority(&self) -> Vec<Arc<dyn PackageSource>> {
        let mut sources = self.sources();
        sources.sort_by(|a, b| {
            let (a, b) = (a.config(), b.config());
            a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id))
        });
        sources
    }

    /// The merged catalog, sorted by package id
    ///
    /// Built on first use and cached until a source is added or removed or
    /// `clear_all_caches` runs.
    pub async fn fetch_merged_index(&self) -> Vec<MergedCatalogEntry> {
        self.with_merged(|merged| merged.values().cloned().collect())
            .await
    }

    /// Look up one package in the merged catalog
    pub async fn get_entry(&self, package_id: &str) -> Option<MergedCatalogEntry> {
        self.with_merged(|merged| merged.get(package_id).cloned())
            .await
    }

    async fn with_merged<R>(&self, f: impl FnOnce(&MergedIndex) -> R) -> R {
        {
            let cached = self.merged.read().await;
            if let Some(merged) = cached.as_ref() {
                return f(merged);
            }
        }

        // Hold the write lock while building so concurrent callers share one fetch round
        let mut cached = self.merged.write().await;
        if cached.is_none() {
            let merged = self.build_merged_index().await;
            *cached = Some(merged);
        }
        f(cached.get_or_insert_with(BTreeMap::new))
    }

    async fn build_merged_index(&self) -> MergedIndex {
        let sources = self.sources_by_priority();
        debug!(
            "Building merged index from {} sources (parallel: {})",
            sources.len(),
            self.config.parallel_fetch
        );

        let results: Vec<(Arc<dyn PackageSource>, Vec<PackageMetadata>)> =
            if self.config.parallel_fetch {
                // `buffered` keeps results in priority order
                stream::iter(sources.into_iter().map(|source| async move {
                    let entries = source.fetch_index().await;
                    (source, entries)
                }))
                .buffered(self.config.max_parallel_sources.max(1))
                .collect()
                .await
            } else {
                let mut results = Vec::with_capacity(sources.len());
                for source in sources {
                    let entries = source.fetch_index().await;
                    results.push((source, entries));
                }
                results
            };

        let mut merged = MergedIndex::new();
        for (source, entries) in results {
            debug!(
                "Merging {} entries from '{}'",
                entries.len(),
                source.config().id
            );
            self.merge_entries(&mut merged, entries, source.config());
        }
        merged
    }

    fn merge_entries(
        &self,
        merged: &mut MergedIndex,
        entries: Vec<PackageMetadata>,
        source_config: &PackageSourceConfig,
    ) {
        for entry in entries {
            let Some(existing) = merged.get_mut(&entry.package_id) else {
                merged.insert(
                    entry.package_id.clone(),
                    MergedCatalogEntry {
                        metadata: entry,
                        available_sources: vec![source_config.id.clone()],
                        selected_source: source_config.id.clone(),
                    },
                );
                continue;
            };

            if existing.available_sources.contains(&source_config.id) {
                warn!(
                    "Source '{}' lists package '{}' more than once; keeping the first entry",
                    source_config.id, entry.package_id
                );
                continue;
            }
            existing.available_sources.push(source_config.id.clone());

            let current_source = self
                .sources
                .get(&existing.selected_source)
                .map(|s| s.config());
            let current = Candidate {
                priority: current_source.map_or(i64::MAX, |c| i64::from(c.priority)),
                version: &existing.metadata.version,
                source_type: current_source.map(|c| c.source_type),
            };
            let candidate = Candidate {
                priority: i64::from(source_config.priority),
                version: &entry.version,
                source_type: Some(source_config.source_type),
            };

            if self
                .config
                .conflict_resolution
                .should_replace(&current, &candidate)
            {
                debug!(
                    "Package '{}': '{}' replaces '{}' ({})",
                    entry.package_id,
                    source_config.id,
                    existing.selected_source,
                    self.config.conflict_resolution
                );
                existing.metadata = entry;
                existing.selected_source = source_config.id.clone();
            }
        }
    }

    /// Load a package from its selected source, falling back to the others
    pub async fn load_package(&self, package_id: &str) -> Result<Option<PackageData>> {
        let Some(entry) = self.get_entry(package_id).await else {
            return Ok(None);
        };

        let ordered = std::iter::once(&entry.selected_source).chain(
            entry
                .available_sources
                .iter()
                .filter(|id| **id != entry.selected_source),
        );

        for source_id in ordered {
            let Some(source) = self.sources.get(source_id) else {
                continue;
            };
            if let Some(data) = source.load_package(package_id).await? {
                return Ok(Some(data));
            }
            debug!(
                "Source '{}' did not return '{}', trying next",
                source_id, package_id
            );
        }

        Ok(None)
    }

    /// Load a package from one specific source, bypassing conflict resolution
    pub async fn load_package_from_source(
        &self,
        package_id: &str,
        source_id: &str,
    ) -> Result<Option<PackageData>> {
        match self.sources.get(source_id) {
            Some(source) => source.load_package(package_id).await,
            None => Ok(None),
        }
    }

    pub async fn has_package(&self, package_id: &str) -> bool {
        self.with_merged(|merged| merged.contains_key(package_id))
            .await
    }

    /// Versions of a package per source id; sources without any are omitted
    pub async fn get_all_versions(&self, package_id: &str) -> BTreeMap<String, Vec<String>> {
        let lookups = self.sources.values().map(|source| async move {
            (source.config().id.clone(), source.get_versions(package_id).await)
        });

        let mut versions = BTreeMap::new();
        for (source_id, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(found) if !found.is_empty() => {
                    versions.insert(source_id, found);
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "Failed to list versions of '{}' from '{}': {}",
                    package_id, source_id, e
                ),
            }
        }
        versions
    }

    /// Drop the merged catalog and every source cache
    pub async fn clear_all_caches(&self) {
        *self.merged.write().await = None;
        for source in self.sources.values() {
            source.clear_cache().await;
        }
    }

    /// Load every merged package into a registry
    ///
    /// Packages that no source can deliver are logged and left out.
    pub async fn build_registry(&self) -> PackageRegistry {
        let entries = self.fetch_merged_index().await;

        let loaded: Vec<_> = stream::iter(entries.into_iter().map(|entry| async move {
            let result = self.load_package(entry.package_id()).await;
            (entry, result)
        }))
        .buffered(self.config.max_parallel_sources.max(1))
        .collect()
        .await;

        let mut registry = PackageRegistry::new();
        for (entry, result) in loaded {
            match result {
                Ok(Some(data)) => {
                    registry.insert(data.into());
                }
                Ok(None) => warn!(
                    "Package '{}' is listed but no source could load it",
                    entry.package_id()
                ),
                Err(e) => {
                    e.log_if_source_failure();
                    warn!("Skipping package '{}': {}", entry.package_id(), e);
                }
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceType;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory source that counts index fetches
    struct MockSource {
        config: PackageSourceConfig,
        packages: Vec<PackageMetadata>,
        data: HashMap<String, PackageData>,
        fetches: Arc<AtomicUsize>,
    }

    impl MockSource {
        fn new(id: &str, source_type: SourceType, priority: i32) -> Self {
            let mut config = PackageSourceConfig::local(id, &format!("/{id}"), priority);
            config.source_type = source_type;
            Self {
                config,
                packages: Vec::new(),
                data: HashMap::new(),
                fetches: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_package(mut self, id: &str, version: &str) -> Self {
            let mut meta = PackageMetadata::placeholder(id);
            meta.version = version.to_string();
            self.packages.push(meta);
            self
        }

        fn with_data(mut self, id: &str, component: &str) -> Self {
            let mut data = PackageData::new(PackageMetadata::placeholder(id));
            data.metadata.source_id = self.config.id.clone();
            data.components
                .push(crate::package::Component::new(component));
            self.data.insert(id.to_string(), data);
            self
        }

        fn disabled(mut self) -> Self {
            self.config.enabled = false;
            self
        }
    }

    #[async_trait]
    impl PackageSource for MockSource {
        fn config(&self) -> &PackageSourceConfig {
            &self.config
        }

        async fn fetch_index(&self) -> Vec<PackageMetadata> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.packages
                .iter()
                .cloned()
                .map(|p| p.with_source(&self.config.id))
                .collect()
        }

        async fn load_package(&self, package_id: &str) -> Result<Option<PackageData>> {
            Ok(self.data.get(package_id).cloned())
        }

        async fn get_versions(&self, package_id: &str) -> Result<Vec<String>> {
            Ok(self
                .packages
                .iter()
                .filter(|p| p.package_id == package_id)
                .map(|p| p.version.clone())
                .collect())
        }

        async fn clear_cache(&self) {}
    }

    fn manager(policy: ConflictResolution) -> SourceManager {
        SourceManager::new(SourceManagerConfig {
            conflict_resolution: policy,
            ..Default::default()
        })
    }

    #[test]
    fn test_disabled_source_ignored() {
        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(MockSource::new("off", SourceType::Local, 0).disabled()));
        assert!(manager.sources().is_empty());
    }

    #[test]
    fn test_remove_source() {
        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(MockSource::new("a", SourceType::Local, 0)));
        assert!(manager.remove_source("a"));
        assert!(!manager.remove_source("a"));
        assert!(manager.get_source("a").is_none());
    }

    #[test]
    fn test_sources_by_priority() {
        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(MockSource::new("low", SourceType::Local, 10)));
        manager.add_source(Arc::new(MockSource::new("high", SourceType::Local, 0)));
        manager.add_source(Arc::new(MockSource::new("med", SourceType::Local, 5)));

        let ids: Vec<String> = manager
            .sources_by_priority()
            .iter()
            .map(|s| s.config().id.clone())
            .collect();
        assert_eq!(ids, vec!["high", "med", "low"]);
    }

    #[tokio::test]
    async fn test_merge_distinct_packages() {
        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(
            MockSource::new("s1", SourceType::Local, 0)
                .with_package("pkg1", "1.0.0")
                .with_package("pkg2", "1.0.0"),
        ));
        manager.add_source(Arc::new(
            MockSource::new("s2", SourceType::Remote, 10)
                .with_package("pkg3", "1.0.0")
                .with_package("pkg4", "1.0.0"),
        ));

        let ids: Vec<String> = manager
            .fetch_merged_index()
            .await
            .iter()
            .map(|e| e.package_id().to_string())
            .collect();
        assert_eq!(ids, vec!["pkg1", "pkg2", "pkg3", "pkg4"]);
    }

    #[tokio::test]
    async fn test_priority_conflict() {
        let mut manager = manager(ConflictResolution::Priority);
        manager.add_source(Arc::new(
            MockSource::new("remote", SourceType::Remote, 10).with_package("shared", "2.0.0"),
        ));
        manager.add_source(Arc::new(
            MockSource::new("local", SourceType::Local, 0).with_package("shared", "1.0.0"),
        ));

        let entry = manager.get_entry("shared").await.unwrap();
        assert_eq!(entry.metadata.version, "1.0.0");
        assert_eq!(entry.selected_source, "local");
        assert_eq!(entry.available_sources, vec!["local", "remote"]);
    }

    #[tokio::test]
    async fn test_latest_version_conflict() {
        let mut manager = manager(ConflictResolution::LatestVersion);
        manager.add_source(Arc::new(
            MockSource::new("local", SourceType::Local, 0).with_package("shared", "1.0.0"),
        ));
        manager.add_source(Arc::new(
            MockSource::new("remote", SourceType::Remote, 10).with_package("shared", "1.10.0"),
        ));

        let entry = manager.get_entry("shared").await.unwrap();
        assert_eq!(entry.selected_source, "remote");
        assert_eq!(entry.metadata.version, "1.10.0");
        assert_eq!(entry.available_sources, vec!["local", "remote"]);
    }

    #[tokio::test]
    async fn test_remote_first_conflict() {
        let mut manager = manager(ConflictResolution::RemoteFirst);
        manager.add_source(Arc::new(
            MockSource::new("local", SourceType::Local, 0).with_package("shared", "1.0.0"),
        ));
        manager.add_source(Arc::new(
            MockSource::new("remote", SourceType::Remote, 10).with_package("shared", "0.9.0"),
        ));

        let entry = manager.get_entry("shared").await.unwrap();
        assert_eq!(entry.selected_source, "remote");
    }

    #[tokio::test]
    async fn test_local_first_conflict() {
        let mut manager = manager(ConflictResolution::LocalFirst);
        manager.add_source(Arc::new(
            MockSource::new("remote", SourceType::Remote, 0).with_package("shared", "3.0.0"),
        ));
        manager.add_source(Arc::new(
            MockSource::new("local", SourceType::Local, 10).with_package("shared", "1.0.0"),
        ));

        let entry = manager.get_entry("shared").await.unwrap();
        assert_eq!(entry.selected_source, "local");
        assert_eq!(entry.available_sources, vec!["remote", "local"]);
    }

    #[tokio::test]
    async fn test_merged_index_cached_until_sources_change() {
        let source = MockSource::new("cached", SourceType::Local, 0).with_package("pkg", "1.0.0");
        let fetches = source.fetches.clone();

        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(source));

        manager.fetch_merged_index().await;
        manager.fetch_merged_index().await;
        manager.fetch_merged_index().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        manager.add_source(Arc::new(MockSource::new("other", SourceType::Local, 1)));
        manager.fetch_merged_index().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        manager.remove_source("other");
        manager.fetch_merged_index().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 3);

        manager.clear_all_caches().await;
        manager.fetch_merged_index().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_serial_fetch_matches_parallel() {
        let mut manager = SourceManager::new(SourceManagerConfig {
            parallel_fetch: false,
            ..Default::default()
        });
        manager.add_source(Arc::new(
            MockSource::new("b", SourceType::Remote, 5).with_package("shared", "1.0.0"),
        ));
        manager.add_source(Arc::new(
            MockSource::new("a", SourceType::Local, 1).with_package("shared", "1.0.0"),
        ));

        let entry = manager.get_entry("shared").await.unwrap();
        assert_eq!(entry.selected_source, "a");
        assert_eq!(entry.available_sources, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_load_package_falls_back() {
        let mut manager = SourceManager::default();
        // Preferred source lists the package but cannot deliver it
        manager.add_source(Arc::new(
            MockSource::new("primary", SourceType::Local, 0).with_package("pkg", "1.0.0"),
        ));
        manager.add_source(Arc::new(
            MockSource::new("backup", SourceType::Remote, 10)
                .with_package("pkg", "1.0.0")
                .with_data("pkg", "from_backup"),
        ));

        let data = manager.load_package("pkg").await.unwrap().unwrap();
        assert_eq!(data.components[0].id, "from_backup");
        assert!(manager.load_package("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_package_from_source() {
        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(
            MockSource::new("a", SourceType::Local, 0)
                .with_package("pkg", "1.0.0")
                .with_data("pkg", "from_a"),
        ));

        let data = manager
            .load_package_from_source("pkg", "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.components[0].id, "from_a");
        assert!(manager
            .load_package_from_source("pkg", "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_has_package_and_versions() {
        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(
            MockSource::new("s1", SourceType::Local, 0).with_package("versioned", "1.0.0"),
        ));
        manager.add_source(Arc::new(
            MockSource::new("s2", SourceType::Remote, 10).with_package("versioned", "2.0.0"),
        ));

        assert!(manager.has_package("versioned").await);
        assert!(!manager.has_package("ghost").await);

        let versions = manager.get_all_versions("versioned").await;
        assert_eq!(versions.get("s1"), Some(&vec!["1.0.0".to_string()]));
        assert_eq!(versions.get("s2"), Some(&vec!["2.0.0".to_string()]));
        assert!(manager.get_all_versions("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn test_build_registry_skips_unloadable() {
        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(
            MockSource::new("s", SourceType::Local, 0)
                .with_package("loadable", "1.0.0")
                .with_package("listed_only", "1.0.0")
                .with_data("loadable", "c1"),
        ));

        let registry = manager.build_registry().await;
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("loadable"));
    }
}
