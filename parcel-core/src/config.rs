//! Package repository configuration
//!
//! A `PackageRepoConfig` lists the sources to merge and how to merge them.
//! It comes from a YAML/JSON file or one of the built-in presets, with
//! environment overrides applied on top.

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{PackageError, Result};
use crate::source::{
    ConflictResolution, PackageSourceConfig, SourceManagerConfig, SourceType,
    DEFAULT_MAX_PARALLEL_SOURCES,
};

pub const DEFAULT_LOCAL_ROOT: &str = "./packages";
pub const DEFAULT_REMOTE_URL: &str = "https://registry.parcel.dev/api/v1";

pub const ENV_PRESET: &str = "PARCEL_ENV";
pub const ENV_ENABLE_REMOTE: &str = "PARCEL_ENABLE_REMOTE";
pub const ENV_REMOTE_URL: &str = "PARCEL_REMOTE_URL";
pub const ENV_AUTH_TOKEN: &str = "PARCEL_AUTH_TOKEN";
pub const ENV_LOCAL_ROOT: &str = "PARCEL_LOCAL_ROOT";
pub const ENV_CONFIG: &str = "PARCEL_CONFIG";

/// Sources and merge behaviour of a package repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRepoConfig {
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,

    #[serde(default = "default_true")]
    pub parallel_fetch: bool,

    #[serde(default = "default_max_parallel_sources")]
    pub max_parallel_sources: usize,

    #[serde(default)]
    pub sources: Vec<PackageSourceConfig>,
}

fn default_true() -> bool {
    true
}

fn default_max_parallel_sources() -> usize {
    DEFAULT_MAX_PARALLEL_SOURCES
}

fn local_source() -> PackageSourceConfig {
    PackageSourceConfig::local("local", DEFAULT_LOCAL_ROOT, 0)
}

fn remote_source(enabled: bool) -> PackageSourceConfig {
    let mut source = PackageSourceConfig::remote("remote", DEFAULT_REMOTE_URL, 10);
    source.enabled = enabled;
    source
}

impl Default for PackageRepoConfig {
    /// Local packages only; the remote registry is configured but disabled
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::Priority,
            parallel_fetch: true,
            max_parallel_sources: DEFAULT_MAX_PARALLEL_SOURCES,
            sources: vec![local_source(), remote_source(false)],
        }
    }
}

impl PackageRepoConfig {
    /// Local packages win, indexes are fetched one at a time
    pub fn development() -> Self {
        Self {
            conflict_resolution: ConflictResolution::LocalFirst,
            parallel_fetch: false,
            ..Self::default()
        }
    }

    /// Local and remote sources, lowest priority number wins
    pub fn production() -> Self {
        Self {
            conflict_resolution: ConflictResolution::Priority,
            sources: vec![local_source(), remote_source(true)],
            ..Self::default()
        }
    }

    /// Preset by name; unknown names fall back to the default preset
    pub fn preset(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::development(),
            "production" | "prod" => Self::production(),
            "default" | "" => Self::default(),
            other => {
                warn!("Unknown configuration preset '{}', using default", other);
                Self::default()
            }
        }
    }

    /// Load from a YAML or JSON file
    pub async fn load_from_path(path: &Path) -> AnyResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            serde_yaml_ng::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        };
        debug!("Loaded package repository config from {}", path.display());
        Ok(config)
    }

    /// Config file or preset selected by the environment, with overrides applied
    pub async fn from_env(env: &ConfigEnv) -> AnyResult<Self> {
        let mut config = match &env.config_path {
            Some(path) => Self::load_from_path(path).await?,
            None => Self::preset(env.preset.as_deref().unwrap_or("default")),
        };
        env.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn manager_config(&self) -> SourceManagerConfig {
        SourceManagerConfig {
            conflict_resolution: self.conflict_resolution,
            parallel_fetch: self.parallel_fetch,
            max_parallel_sources: self.max_parallel_sources,
        }
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &PackageSourceConfig> {
        self.sources.iter().filter(|source| source.enabled)
    }

    /// Reject configurations no source manager can be built from
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_sources == 0 {
            return Err(PackageError::Validation(
                "maxParallelSources must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(PackageError::Validation(format!(
                    "Duplicate source id '{}'",
                    source.id
                )));
            }

            let url = source.url.trim();
            if url.is_empty() {
                return Err(PackageError::Validation(format!(
                    "Source '{}' has no url",
                    source.id
                )));
            }

            if source.source_type == SourceType::Remote
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(PackageError::Validation(format!(
                    "Remote source '{}' url must start with http:// or https://, got '{}'",
                    source.id, url
                )));
            }
        }

        if self.enabled_sources().next().is_none() {
            return Err(PackageError::Validation(
                "At least one source must be enabled".to_string(),
            ));
        }

        Ok(())
    }
}

/// Environment overrides, read once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigEnv {
    pub preset: Option<String>,
    pub enable_remote: bool,
    pub remote_url: Option<String>,
    pub auth_token: Option<String>,
    pub local_root: Option<String>,
    pub config_path: Option<PathBuf>,
}

impl ConfigEnv {
    /// Read the `PARCEL_*` variables of this process
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit variables
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut env = Self::default();
        for (key, value) in vars {
            let value: String = value.into();
            if value.trim().is_empty() {
                continue;
            }
            match key.as_ref() {
                ENV_PRESET => env.preset = Some(value),
                ENV_ENABLE_REMOTE => {
                    env.enable_remote = matches!(
                        value.trim().to_ascii_lowercase().as_str(),
                        "true" | "1" | "yes"
                    )
                }
                ENV_REMOTE_URL => env.remote_url = Some(value),
                ENV_AUTH_TOKEN => env.auth_token = Some(value),
                ENV_LOCAL_ROOT => env.local_root = Some(value),
                ENV_CONFIG => env.config_path = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        env
    }

    /// Apply the overrides to every matching source
    pub fn apply(&self, config: &mut PackageRepoConfig) {
        for source in &mut config.sources {
            match source.source_type {
                SourceType::Remote => {
                    if self.enable_remote && !source.enabled {
                        debug!("Enabling remote source '{}' from environment", source.id);
                        source.enabled = true;
                    }
                    if let Some(url) = &self.remote_url {
                        source.url = url.clone();
                    }
                    if let Some(token) = &self.auth_token {
                        source.auth_token = Some(token.clone());
                    }
                }
                SourceType::Local => {
                    if let Some(root) = &self.local_root {
                        source.url = root.clone();
                    }
                }
                SourceType::Git => {}
            }
        }
    }
}

/// Directory for persistent data such as the installed-package store
pub fn default_data_dir() -> AnyResult<PathBuf> {
    if let Some(project_dirs) = directories::ProjectDirs::from("", "", "parcel") {
        return Ok(project_dirs.data_dir().to_path_buf());
    }
    Ok(dirs::home_dir()
        .context("Could not determine home directory")?
        .join(".parcel"))
}
