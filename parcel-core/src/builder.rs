//! Registry construction from a seed directory
//!
//! `RegistryBuilder` turns a directory of package seed artifacts into a
//! `PackageRegistry`, substituting defaults for whatever is missing.
//! `RegistryBootstrap` wraps a builder so the registry is built exactly once.

use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::package::seed;
use crate::package::{PackageDefinition, PackageMetadata, PackageRegistry};

/// Packages built when the root has no index
pub const DEFAULT_PACKAGE_IDS: &[&str] = &[
    "admin_dialog",
    "data_table",
    "form_builder",
    "nav_menu",
    "dashboard",
    "notification_center",
];

#[derive(Deserialize)]
#[serde(untagged)]
enum IndexEntry {
    Id(String),
    Entry {
        #[serde(rename = "packageId")]
        package_id: String,
    },
}

#[derive(Deserialize)]
struct SeedIndex {
    #[serde(default)]
    packages: Vec<IndexEntry>,
}

/// Builds a registry from `<root>/<package-id>/...` seed artifacts
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    root: PathBuf,
    default_ids: Vec<String>,
}

impl RegistryBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_ids: DEFAULT_PACKAGE_IDS.iter().map(|id| id.to_string()).collect(),
        }
    }

    /// Replace the ids used when the root has no index
    pub fn with_default_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Package ids listed in `index.json`, or the defaults
    pub async fn package_ids(&self) -> Vec<String> {
        let index_path = self.root.join(seed::INDEX_FILE);
        match seed::read_json::<SeedIndex>(&index_path).await {
            Ok(Some(index)) => {
                let mut ids: Vec<String> = Vec::with_capacity(index.packages.len());
                for entry in index.packages {
                    let id = match entry {
                        IndexEntry::Id(id) => id,
                        IndexEntry::Entry { package_id } => package_id,
                    };
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                ids
            }
            Ok(None) => {
                debug!(
                    "No index at {}, using {} default packages",
                    index_path.display(),
                    self.default_ids.len()
                );
                self.default_ids.clone()
            }
            Err(e) => {
                warn!("Ignoring unreadable index: {:#}", e);
                self.default_ids.clone()
            }
        }
    }

    /// Build the registry
    ///
    /// Never fails: each artifact that is missing or unreadable falls back
    /// to a default and is logged.
    pub async fn build(&self) -> PackageRegistry {
        let ids = self.package_ids().await;
        let definitions = join_all(ids.iter().map(|id| self.build_package(id))).await;

        let registry: PackageRegistry = definitions.into_iter().collect();
        info!(
            "Built registry of {} packages from {}",
            registry.len(),
            self.root.display()
        );
        registry
    }

    async fn build_package(&self, package_id: &str) -> PackageDefinition {
        let dir = self.root.join(package_id);

        let (metadata, components, examples, scripts, script_files) = tokio::join!(
            seed::read_metadata(&dir),
            seed::read_components(&dir),
            seed::read_examples(&dir),
            seed::read_legacy_script(&dir),
            seed::read_script_files(&dir),
        );

        let metadata = match or_fallback(package_id, "metadata", metadata) {
            Some(mut metadata) => {
                if metadata.package_id != package_id {
                    warn!(
                        "Metadata of '{}' declares id '{}', using the directory name",
                        package_id, metadata.package_id
                    );
                    metadata.package_id = package_id.to_string();
                }
                metadata
            }
            None => PackageMetadata::placeholder(package_id),
        };

        PackageDefinition {
            metadata,
            components: or_fallback(package_id, "components", components).unwrap_or_default(),
            scripts: or_fallback(package_id, "scripts", scripts),
            script_files: or_fallback(package_id, "script files", script_files.map(Some))
                .unwrap_or_default(),
            examples: Some(
                or_fallback(package_id, "examples", examples)
                    .unwrap_or_else(|| Value::Object(Default::default())),
            ),
        }
    }
}

fn or_fallback<T>(package_id: &str, artifact: &str, result: anyhow::Result<Option<T>>) -> Option<T> {
    match result {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            debug!("Package '{}' has no {}, using default", package_id, artifact);
            None
        }
        Err(e) => {
            warn!(
                "Failed to load {} of '{}', using default: {:#}",
                artifact, package_id, e
            );
            None
        }
    }
}

/// Lifecycle of a bootstrapped registry
#[derive(Debug, Clone, Default)]
pub enum BootstrapState {
    #[default]
    Uninitialized,
    Initializing,
    Ready(Arc<PackageRegistry>),
}

impl BootstrapState {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootstrapState::Ready(_))
    }
}

/// Builds a registry once and hands out the shared result
pub struct RegistryBootstrap {
    builder: RegistryBuilder,
    state: RwLock<BootstrapState>,
    // Serializes builds so concurrent callers wait for one result
    init_gate: Mutex<()>,
}

impl RegistryBootstrap {
    pub fn new(builder: RegistryBuilder) -> Self {
        Self {
            builder,
            state: RwLock::new(BootstrapState::Uninitialized),
            init_gate: Mutex::new(()),
        }
    }

    /// Build the registry on first call; later calls return the same one
    pub async fn initialize(&self) -> Arc<PackageRegistry> {
        if let Some(registry) = self.registry() {
            return registry;
        }

        let _gate = self.init_gate.lock().await;
        if let Some(registry) = self.registry() {
            return registry;
        }

        self.set_state(BootstrapState::Initializing);
        let registry = Arc::new(self.builder.build().await);
        self.set_state(BootstrapState::Ready(registry.clone()));
        registry
    }

    /// Snapshot of the current state
    pub fn state(&self) -> BootstrapState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The registry, once ready
    pub fn registry(&self) -> Option<Arc<PackageRegistry>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            BootstrapState::Ready(registry) => Some(registry.clone()),
            _ => None,
        }
    }

    /// Forget the built registry so the next `initialize` rebuilds it
    pub fn reset(&self) {
        debug!("Resetting registry bootstrap");
        self.set_state(BootstrapState::Uninitialized);
    }

    fn set_state(&self, state: BootstrapState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}
