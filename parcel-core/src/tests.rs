//! Integration tests across builder, resolver and lifecycle

#[cfg(test)]
mod integration_tests {
    use std::path::Path;
    use std::sync::Arc;

    use crate::builder::RegistryBuilder;
    use crate::lifecycle::{
        get_installed_packages, install_package, install_with_dependencies, is_package_installed,
        uninstall_package, UninstallOptions,
    };
    use crate::resolver::resolve_dependency_order;
    use crate::source::{LocalPackageSource, PackageSourceConfig, SourceManager};
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn metadata(id: &str, version: &str, deps: &[&str]) -> String {
        serde_json::json!({
            "packageId": id,
            "name": id,
            "version": version,
            "dependencies": deps,
        })
        .to_string()
    }

    /// Three packages in a chain: dashboard -> data_table -> ui_kit
    fn seed(root: &Path) {
        write(
            root,
            "index.json",
            r#"{"packages": [{"packageId": "dashboard"}, {"packageId": "data_table"}, {"packageId": "ui_kit"}]}"#,
        );
        write(root, "ui_kit/seed/metadata.json", &metadata("ui_kit", "1.0.0", &[]));
        write(root, "ui_kit/seed/components.json", r#"[{"id": "ui_button"}]"#);
        write(
            root,
            "data_table/seed/metadata.json",
            &metadata("data_table", "1.1.0", &["ui_kit"]),
        );
        write(root, "data_table/seed/components.json", r#"[{"id": "table_grid"}]"#);
        write(
            root,
            "dashboard/seed/metadata.json",
            &metadata("dashboard", "2.0.0", &["data_table"]),
        );
        write(root, "dashboard/seed/scripts.lua", "return 'dashboard'");
    }

    /// Build, resolve and install in load order
    #[tokio::test]
    async fn test_bootstrap_resolve_install() {
        let temp_dir = TempDir::new().unwrap();
        seed(temp_dir.path());

        let registry = RegistryBuilder::new(temp_dir.path()).build().await;
        let resolution = resolve_dependency_order(&registry);
        assert!(resolution.is_clean());
        assert_eq!(
            resolution.load_order,
            vec!["ui_kit", "data_table", "dashboard"]
        );

        let store = MemoryStore::new();
        for id in &resolution.load_order {
            install_package(&registry, id, &store).await.unwrap();
        }
        assert_eq!(
            get_installed_packages(&store).await,
            vec!["dashboard", "data_table", "ui_kit"]
        );

        uninstall_package(&registry, "dashboard", &store, UninstallOptions::default())
            .await
            .unwrap();
        assert!(!is_package_installed("dashboard", &store).await);
        assert!(is_package_installed("ui_kit", &store).await);
    }

    /// A registry loaded through the source manager installs the same way
    #[tokio::test]
    async fn test_source_manager_registry_install() {
        let temp_dir = TempDir::new().unwrap();
        seed(temp_dir.path());

        let mut manager = SourceManager::default();
        manager.add_source(Arc::new(LocalPackageSource::new(PackageSourceConfig::local(
            "disk",
            temp_dir.path().to_str().unwrap(),
            0,
        ))));

        let registry = manager.build_registry().await;
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("dashboard").unwrap().metadata.source_id, "disk");

        let store = MemoryStore::new();
        let reports = install_with_dependencies(&registry, "dashboard", &store)
            .await
            .unwrap();
        let installed: Vec<&str> = reports.iter().map(|r| r.package_id.as_str()).collect();
        assert_eq!(installed, vec!["ui_kit", "data_table", "dashboard"]);
        assert_eq!(reports[2].scripts_written, 1);
    }
}
