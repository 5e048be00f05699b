//! Package sources - where catalogs come from
//!
//! A source adapter lists the packages an origin offers and loads their
//! payloads. Adapters exist for:
//! - Local directories (seed artifacts on disk)
//! - Remote HTTP registries (feature `remote`)
//!
//! Git sources are accepted by configuration but have no adapter yet.
//!
//! The [`SourceManager`] combines several adapters into one merged catalog.

mod conflict;
mod local;
mod manager;
#[cfg(feature = "remote")]
mod remote;

pub use conflict::{compare_versions, ConflictResolution};
pub use local::LocalPackageSource;
pub use manager::{
    MergedCatalogEntry, SourceManager, SourceManagerConfig, DEFAULT_MAX_PARALLEL_SOURCES,
};
#[cfg(feature = "remote")]
pub use remote::{RemotePackageSource, SearchFilters, SearchResults, DEFAULT_REMOTE_CACHE_TTL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::package::{PackageData, PackageMetadata};

/// Kind of origin behind a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
    Remote,
    Git,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Local => "local",
            SourceType::Remote => "remote",
            SourceType::Git => "git",
        };
        f.write_str(name)
    }
}

/// Configuration of one package source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSourceConfig {
    /// Unique source id
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// Directory path (local) or base URL (remote, git)
    pub url: String,

    /// Lower number is preferred
    #[serde(default)]
    pub priority: i32,

    /// Disabled sources are never added to a manager
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Remote cache expiry override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_seconds: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl PackageSourceConfig {
    pub fn local(id: &str, path: &str, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Local packages ({id})"),
            source_type: SourceType::Local,
            url: path.to_string(),
            priority,
            enabled: true,
            auth_token: None,
            branch: None,
            cache_ttl_seconds: None,
        }
    }

    pub fn remote(id: &str, url: &str, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Remote registry ({id})"),
            source_type: SourceType::Remote,
            url: url.to_string(),
            priority,
            enabled: true,
            auth_token: None,
            branch: None,
            cache_ttl_seconds: None,
        }
    }
}

/// Uniform interface over a package catalog origin
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Configuration this adapter was built from
    fn config(&self) -> &PackageSourceConfig;

    /// Every package this source offers, stamped with the source id
    ///
    /// Never fails: adapters recover transport errors by falling back to a
    /// cached or empty catalog.
    async fn fetch_index(&self) -> Vec<PackageMetadata>;

    /// Full payload of a package, `None` when this source does not have it
    async fn load_package(&self, package_id: &str) -> Result<Option<PackageData>>;

    async fn has_package(&self, package_id: &str) -> bool {
        self.fetch_index()
            .await
            .iter()
            .any(|entry| entry.package_id == package_id)
    }

    /// Versions of a package this source can serve
    async fn get_versions(&self, package_id: &str) -> Result<Vec<String>>;

    /// Drop cached index and package data
    async fn clear_cache(&self);

    /// Remote adapters expose server-side search through this hook
    #[cfg(feature = "remote")]
    fn as_remote(&self) -> Option<&RemotePackageSource> {
        None
    }
}

/// Build the adapter for a source configuration
///
/// Returns `None` for source types without an adapter in this build.
pub fn from_config(config: PackageSourceConfig) -> Option<Box<dyn PackageSource>> {
    match config.source_type {
        SourceType::Local => Some(Box::new(LocalPackageSource::new(config))),
        #[cfg(feature = "remote")]
        SourceType::Remote => match RemotePackageSource::new(config) {
            Ok(source) => Some(Box::new(source)),
            Err(e) => {
                tracing::warn!("Failed to create remote source: {}", e);
                None
            }
        },
        #[cfg(not(feature = "remote"))]
        SourceType::Remote => {
            tracing::warn!(
                "Source '{}' is remote but the 'remote' feature is not compiled in",
                config.id
            );
            None
        }
        SourceType::Git => {
            tracing::warn!(
                "Source '{}' is a git source; git sources are not supported yet",
                config.id
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_type_field() {
        let config: PackageSourceConfig = serde_json::from_value(serde_json::json!({
            "id": "main",
            "name": "Main",
            "type": "remote",
            "url": "https://registry.example.com",
            "priority": 10,
            "authToken": "secret"
        }))
        .unwrap();

        assert_eq!(config.source_type, SourceType::Remote);
        assert!(config.enabled);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_git_source_has_no_adapter() {
        let mut config = PackageSourceConfig::local("git", "https://git.example.com/pkgs", 5);
        config.source_type = SourceType::Git;
        assert!(from_config(config).is_none());
    }

    #[test]
    fn test_local_adapter_from_config() {
        let config = PackageSourceConfig::local("local", "./packages", 0);
        let source = from_config(config).unwrap();
        assert_eq!(source.config().id, "local");
        assert_eq!(source.config().source_type, SourceType::Local);
    }
}
