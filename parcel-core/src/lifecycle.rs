//! Install and uninstall packages against a `PackageStore`
//!
//! Installing writes a package's components and scripts plus an install
//! record. Every write is a keyed overwrite, so repeating an install is safe.
//! `export_seed` produces the same records for a whole registry without a
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{PackageError, Result};
use crate::package::{PackageDefinition, PackageRegistry};
use crate::resolver::{get_all_dependencies, resolve_dependency_order};
use crate::store::{PackageStore, COMPONENTS_TABLE, INSTALLED_TABLE, SCRIPTS_TABLE};

pub use crate::resolver::{check_dependencies, DependencyCheck};

/// What an install left in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackageRecord {
    pub package_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub source_id: String,
    pub installed_at: DateTime<Utc>,
    /// Keys written to the components table
    #[serde(default)]
    pub components: Vec<String>,
    /// Keys written to the scripts table
    #[serde(default)]
    pub scripts: Vec<String>,
}

/// Summary of one successful install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub package_id: String,
    pub version: String,
    pub components_written: usize,
    pub scripts_written: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    /// Also delete the component and script records written at install time
    pub purge: bool,
}

fn legacy_script_key(package_id: &str) -> String {
    format!("package_{package_id}")
}

fn script_file_key(package_id: &str, script_name: &str) -> String {
    format!("package_{package_id}_{script_name}")
}

/// Script records a package installs, keyed for the scripts table
fn script_records(package: &PackageDefinition) -> Vec<(String, Value)> {
    let meta = &package.metadata;
    let mut records = Vec::new();

    if let Some(code) = package.scripts.as_deref().filter(|code| !code.is_empty()) {
        let key = legacy_script_key(&meta.package_id);
        records.push((
            key.clone(),
            json!({
                "id": key,
                "name": format!("{} Scripts", meta.name),
                "code": code,
                "category": "package",
                "packageId": meta.package_id,
            }),
        ));
    }

    for file in &package.script_files {
        let key = script_file_key(&meta.package_id, &file.name);
        records.push((
            key.clone(),
            json!({
                "id": key,
                "name": format!("{} - {}", meta.name, file.name),
                "code": file.code,
                "category": file.category.as_deref().unwrap_or("package"),
                "packageId": meta.package_id,
                "path": file.path,
                "description": file.description,
            }),
        ));
    }

    records
}

async fn write(store: &dyn PackageStore, table: &str, key: &str, value: Value) -> Result<()> {
    store
        .set(table, key, value)
        .await
        .map_err(|e| PackageError::store(format!("Failed to write '{key}' to {table}"), e))
}

async fn remove(store: &dyn PackageStore, table: &str, key: &str) -> Result<bool> {
    store
        .delete(table, key)
        .await
        .map_err(|e| PackageError::store(format!("Failed to delete '{key}' from {table}"), e))
}

/// Install one package
///
/// Fails without writing anything when the package is unknown or a
/// dependency is missing from the registry.
pub async fn install_package(
    registry: &PackageRegistry,
    package_id: &str,
    store: &dyn PackageStore,
) -> Result<InstallReport> {
    let package = registry
        .get(package_id)
        .ok_or_else(|| PackageError::package_not_found(package_id))?;

    let check = check_dependencies(registry, package_id);
    if !check.satisfied {
        return Err(PackageError::Dependency {
            package_id: package_id.to_string(),
            missing: check.missing,
        });
    }

    let mut components = Vec::with_capacity(package.components.len());
    for component in &package.components {
        write(store, COMPONENTS_TABLE, &component.id, component.to_value()).await?;
        components.push(component.id.clone());
    }

    let mut scripts = Vec::new();
    for (key, record) in script_records(package) {
        write(store, SCRIPTS_TABLE, &key, record).await?;
        scripts.push(key);
    }

    let meta = &package.metadata;
    let record = InstalledPackageRecord {
        package_id: meta.package_id.clone(),
        name: meta.name.clone(),
        version: meta.version.clone(),
        source_id: meta.source_id.clone(),
        installed_at: Utc::now(),
        components,
        scripts,
    };
    let value = serde_json::to_value(&record)
        .map_err(|e| PackageError::store("Failed to encode install record", e.into()))?;
    write(store, INSTALLED_TABLE, package_id, value).await?;

    info!(
        "Installed package '{}' {} ({} components, {} scripts)",
        package_id,
        meta.version,
        record.components.len(),
        record.scripts.len()
    );

    Ok(InstallReport {
        package_id: record.package_id,
        version: record.version,
        components_written: record.components.len(),
        scripts_written: record.scripts.len(),
    })
}

/// Install a package after every transitive dependency, skipping installed ones
///
/// Returns a report per package actually installed, dependencies first.
pub async fn install_with_dependencies(
    registry: &PackageRegistry,
    package_id: &str,
    store: &dyn PackageStore,
) -> Result<Vec<InstallReport>> {
    if !registry.contains(package_id) {
        return Err(PackageError::package_not_found(package_id));
    }

    let closure = get_all_dependencies(registry, package_id);
    let missing: Vec<String> = closure
        .iter()
        .filter(|id| !registry.contains(id))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(PackageError::Dependency {
            package_id: package_id.to_string(),
            missing,
        });
    }

    let subset: PackageRegistry = closure
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(package_id))
        .filter_map(|id| registry.get(id).cloned())
        .collect();
    let resolution = resolve_dependency_order(&subset);
    if !resolution.circular.is_empty() {
        return Err(PackageError::CircularDependency {
            cycles: resolution.circular,
        });
    }

    let mut reports = Vec::new();
    for id in &resolution.load_order {
        if id != package_id && is_package_installed(id, store).await {
            debug!("Dependency '{}' already installed", id);
            continue;
        }
        reports.push(install_package(registry, id, store).await?);
    }
    Ok(reports)
}

/// Remove a package's install record, returning whether one existed
pub async fn uninstall_package(
    registry: &PackageRegistry,
    package_id: &str,
    store: &dyn PackageStore,
    options: UninstallOptions,
) -> Result<bool> {
    let package = registry
        .get(package_id)
        .ok_or_else(|| PackageError::package_not_found(package_id))?;

    if options.purge {
        // Prefer the keys recorded at install time; the registry may have changed since
        let (components, scripts) = match get_installed_record(package_id, store).await {
            Some(record) => (record.components, record.scripts),
            None => (
                package.components.iter().map(|c| c.id.clone()).collect(),
                script_records(package).into_iter().map(|(key, _)| key).collect(),
            ),
        };
        for key in &components {
            remove(store, COMPONENTS_TABLE, key).await?;
        }
        for key in &scripts {
            remove(store, SCRIPTS_TABLE, key).await?;
        }
        debug!(
            "Purged {} components and {} scripts of '{}'",
            components.len(),
            scripts.len(),
            package_id
        );
    }

    let existed = remove(store, INSTALLED_TABLE, package_id).await?;
    if existed {
        info!("Uninstalled package '{}'", package_id);
    } else {
        debug!("Package '{}' was not installed", package_id);
    }
    Ok(existed)
}

/// Installed package ids, sorted; empty when the store cannot be read
pub async fn get_installed_packages(store: &dyn PackageStore) -> Vec<String> {
    match store.get_all(INSTALLED_TABLE).await {
        Ok(rows) => rows.into_keys().collect(),
        Err(e) => {
            warn!("Failed to read installed packages: {:#}", e);
            Vec::new()
        }
    }
}

/// False when the store cannot be read
pub async fn is_package_installed(package_id: &str, store: &dyn PackageStore) -> bool {
    match store.get(INSTALLED_TABLE, package_id).await {
        Ok(record) => record.is_some(),
        Err(e) => {
            warn!("Failed to look up install record of '{}': {:#}", package_id, e);
            false
        }
    }
}

pub async fn get_installed_record(
    package_id: &str,
    store: &dyn PackageStore,
) -> Option<InstalledPackageRecord> {
    let value = match store.get(INSTALLED_TABLE, package_id).await {
        Ok(value) => value?,
        Err(e) => {
            warn!("Failed to look up install record of '{}': {:#}", package_id, e);
            return None;
        }
    };

    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Malformed install record for '{}': {}", package_id, e);
            None
        }
    }
}

/// Every package of a registry flattened into seed records
///
/// Components and scripts carry the same shape `install_package` writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedExport {
    pub components: Vec<Value>,
    pub scripts: Vec<Value>,
    pub packages: Vec<Value>,
}

/// Flatten a whole registry into seed data, packages in id order
pub fn export_seed(registry: &PackageRegistry) -> SeedExport {
    let mut export = SeedExport::default();

    for package in registry.iter() {
        export
            .components
            .extend(package.components.iter().map(|c| c.to_value()));
        export
            .scripts
            .extend(script_records(package).into_iter().map(|(_, record)| record));

        let meta = &package.metadata;
        export.packages.push(json!({
            "packageId": meta.package_id,
            "name": meta.name,
            "version": meta.version,
            "description": meta.description,
            "author": meta.author,
            "category": meta.category,
        }));
    }

    debug!(
        "Exported {} packages ({} components, {} scripts)",
        export.packages.len(),
        export.components.len(),
        export.scripts.len()
    );
    export
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Component, PackageMetadata, ScriptFile};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn package(id: &str, deps: &[&str]) -> PackageDefinition {
        let mut meta = PackageMetadata::placeholder(id);
        meta.name = format!("{id} package");
        meta.dependencies = deps.iter().map(|d| d.to_string()).collect();
        PackageDefinition::from(meta)
    }

    fn registry() -> PackageRegistry {
        let mut forum = package("forum", &["ui_kit"]);
        forum.components = vec![Component::new("forum_thread"), Component::new("forum_post")];
        forum.scripts = Some("return 'legacy'".to_string());
        forum.script_files = vec![ScriptFile {
            name: "init".to_string(),
            path: "scripts/init.lua".to_string(),
            code: "return {}".to_string(),
            category: None,
            description: Some("Entry point".to_string()),
        }];

        let mut ui_kit = package("ui_kit", &[]);
        ui_kit.components = vec![Component::new("ui_button")];

        [forum, ui_kit, package("broken", &["ghost"])]
            .into_iter()
            .collect()
    }

    /// Store whose every call fails
    struct FailingStore;

    #[async_trait]
    impl PackageStore for FailingStore {
        async fn get(&self, _table: &str, _key: &str) -> anyhow::Result<Option<Value>> {
            anyhow::bail!("store offline")
        }
        async fn set(&self, _table: &str, _key: &str, _value: Value) -> anyhow::Result<()> {
            anyhow::bail!("store offline")
        }
        async fn get_all(&self, _table: &str) -> anyhow::Result<BTreeMap<String, Value>> {
            anyhow::bail!("store offline")
        }
        async fn delete(&self, _table: &str, _key: &str) -> anyhow::Result<bool> {
            anyhow::bail!("store offline")
        }
    }

    #[tokio::test]
    async fn test_install_writes_components_and_scripts() {
        let registry = registry();
        let store = MemoryStore::new();

        let report = install_package(&registry, "forum", &store).await.unwrap();
        assert_eq!(report.components_written, 2);
        assert_eq!(report.scripts_written, 2);

        assert!(store.get(COMPONENTS_TABLE, "forum_thread").await.unwrap().is_some());
        let legacy = store
            .get(SCRIPTS_TABLE, "package_forum")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(legacy["code"], "return 'legacy'");
        assert_eq!(legacy["packageId"], "forum");
        let init = store
            .get(SCRIPTS_TABLE, "package_forum_init")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(init["category"], "package");
        assert_eq!(init["name"], "forum package - init");

        let record = get_installed_record("forum", &store).await.unwrap();
        assert_eq!(record.version, "1.0.0");
        assert_eq!(record.components, vec!["forum_thread", "forum_post"]);
    }

    #[tokio::test]
    async fn test_install_then_uninstall() {
        let registry = registry();
        let store = MemoryStore::new();

        install_package(&registry, "ui_kit", &store).await.unwrap();
        assert!(is_package_installed("ui_kit", &store).await);

        let existed = uninstall_package(&registry, "ui_kit", &store, UninstallOptions::default())
            .await
            .unwrap();
        assert!(existed);
        assert!(!is_package_installed("ui_kit", &store).await);
        // Without purge the component stays behind
        assert!(store.get(COMPONENTS_TABLE, "ui_button").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_uninstall_purge_removes_records() {
        let registry = registry();
        let store = MemoryStore::new();
        install_package(&registry, "ui_kit", &store).await.unwrap();
        install_package(&registry, "forum", &store).await.unwrap();

        uninstall_package(&registry, "forum", &store, UninstallOptions { purge: true })
            .await
            .unwrap();

        assert!(store.get(COMPONENTS_TABLE, "forum_thread").await.unwrap().is_none());
        assert!(store.get(SCRIPTS_TABLE, "package_forum").await.unwrap().is_none());
        assert!(store.get(SCRIPTS_TABLE, "package_forum_init").await.unwrap().is_none());
        assert!(store.get(COMPONENTS_TABLE, "ui_button").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unmet_dependency_writes_nothing() {
        let registry = registry();
        let store = MemoryStore::new();

        let err = install_package(&registry, "broken", &store).await.unwrap_err();
        assert!(matches!(err, PackageError::Dependency { .. }));
        assert!(err.to_string().contains("ghost"));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_package() {
        let registry = registry();
        let store = MemoryStore::new();

        assert!(install_package(&registry, "nope", &store)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(uninstall_package(&registry, "nope", &store, UninstallOptions::default())
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_installed_packages_sorted() {
        let registry = registry();
        let store = MemoryStore::new();
        install_package(&registry, "ui_kit", &store).await.unwrap();
        install_package(&registry, "forum", &store).await.unwrap();

        assert_eq!(get_installed_packages(&store).await, vec!["forum", "ui_kit"]);
    }

    #[tokio::test]
    async fn test_store_failures() {
        let registry = registry();

        assert!(get_installed_packages(&FailingStore).await.is_empty());
        assert!(!is_package_installed("forum", &FailingStore).await);
        assert!(get_installed_record("forum", &FailingStore).await.is_none());

        let err = install_package(&registry, "ui_kit", &FailingStore)
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::Store { .. }));
    }

    #[tokio::test]
    async fn test_install_with_dependencies() {
        let registry = registry();
        let store = MemoryStore::new();

        let reports = install_with_dependencies(&registry, "forum", &store)
            .await
            .unwrap();
        let order: Vec<&str> = reports.iter().map(|r| r.package_id.as_str()).collect();
        assert_eq!(order, vec!["ui_kit", "forum"]);

        // Already installed dependencies are skipped
        let reports = install_with_dependencies(&registry, "forum", &store)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].package_id, "forum");
    }

    #[tokio::test]
    async fn test_install_with_dependencies_refuses_cycles_and_gaps() {
        let registry: PackageRegistry = [
            package("a", &["b"]),
            package("b", &["a"]),
            package("c", &["d"]),
            package("d", &["ghost"]),
        ]
        .into_iter()
        .collect();
        let store = MemoryStore::new();

        let err = install_with_dependencies(&registry, "a", &store)
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::CircularDependency { .. }));

        let err = install_with_dependencies(&registry, "c", &store)
            .await
            .unwrap_err();
        match err {
            PackageError::Dependency { missing, .. } => assert_eq!(missing, vec!["ghost"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_export_seed_matches_install_records() {
        let registry = registry();
        let export = export_seed(&registry);

        let package_ids: Vec<&str> = export
            .packages
            .iter()
            .map(|p| p["packageId"].as_str().unwrap())
            .collect();
        assert_eq!(package_ids, vec!["broken", "forum", "ui_kit"]);
        assert_eq!(export.packages[1]["name"], "forum package");
        assert_eq!(export.components.len(), 3);

        let script_ids: Vec<&str> = export
            .scripts
            .iter()
            .map(|s| s["id"].as_str().unwrap())
            .collect();
        assert_eq!(script_ids, vec!["package_forum", "package_forum_init"]);

        // Same records an install writes
        let store = MemoryStore::new();
        install_package(&registry, "forum", &store).await.unwrap();
        let installed = store
            .get(SCRIPTS_TABLE, "package_forum_init")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(export.scripts[1], installed);
        assert_eq!(export.scripts[1]["description"], "Entry point");
    }
}
