//! On-disk seed artifacts of a package directory
//!
//! ```text
//! <root>/
//! ├── index.json                 ← { "packages": [...] }
//! └── <package-id>/
//!     ├── seed/metadata.json
//!     ├── seed/components.json
//!     ├── seed/scripts.lua       ← legacy single script
//!     ├── seed/scripts/          ← manifest.json-listed files, else *.lua
//!     └── static_content/examples.json
//! ```
//!
//! Every reader returns `Ok(None)` when the artifact is absent and an error
//! only when it exists but cannot be read or parsed.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

use super::{Component, PackageMetadata, ScriptFile};

pub const INDEX_FILE: &str = "index.json";
pub const METADATA_PATH: &str = "seed/metadata.json";
pub const COMPONENTS_PATH: &str = "seed/components.json";
pub const EXAMPLES_PATH: &str = "static_content/examples.json";
pub const LEGACY_SCRIPT_PATH: &str = "seed/scripts.lua";
pub const SCRIPTS_DIR: &str = "seed/scripts";
pub const SCRIPT_MANIFEST: &str = "manifest.json";

/// Read a file, mapping "not found" to `None`
pub async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Read and parse a JSON artifact
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(content) = read_optional(path).await? else {
        return Ok(None);
    };
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

pub async fn read_metadata(package_dir: &Path) -> Result<Option<PackageMetadata>> {
    read_json(&package_dir.join(METADATA_PATH)).await
}

/// Components accept either a bare array or `{ "components": [...] }`
pub async fn read_components(package_dir: &Path) -> Result<Option<Vec<Component>>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ComponentsFile {
        List(Vec<Component>),
        Wrapped { components: Vec<Component> },
    }

    let file: Option<ComponentsFile> = read_json(&package_dir.join(COMPONENTS_PATH)).await?;
    Ok(file.map(|f| match f {
        ComponentsFile::List(list) => list,
        ComponentsFile::Wrapped { components } => components,
    }))
}

pub async fn read_examples(package_dir: &Path) -> Result<Option<serde_json::Value>> {
    read_json(&package_dir.join(EXAMPLES_PATH)).await
}

pub async fn read_legacy_script(package_dir: &Path) -> Result<Option<String>> {
    read_optional(&package_dir.join(LEGACY_SCRIPT_PATH)).await
}

#[derive(Debug, Default, Deserialize)]
struct ScriptManifest {
    #[serde(default)]
    scripts: Vec<ScriptManifestEntry>,
}

/// One manifest line: the file to load and how to label it
#[derive(Debug, Deserialize)]
struct ScriptManifestEntry {
    file: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Category given to scripts found without a manifest
pub const AUTO_DISCOVERED_CATEGORY: &str = "auto-discovered";

/// Read the scripts folder
///
/// With a `manifest.json`, exactly the listed files are loaded in manifest
/// order; a listed file that is missing or unreadable is skipped. Without
/// one (or with one that does not parse), every `*.lua` file is loaded,
/// sorted by name.
pub async fn read_script_files(package_dir: &Path) -> Result<Vec<ScriptFile>> {
    let scripts_dir = package_dir.join(SCRIPTS_DIR);

    match read_json::<ScriptManifest>(&scripts_dir.join(SCRIPT_MANIFEST)).await {
        Ok(Some(manifest)) => return Ok(read_manifest_scripts(&scripts_dir, manifest).await),
        Ok(None) => {}
        Err(e) => warn!("Ignoring script manifest: {:#}", e),
    }

    discover_lua_scripts(&scripts_dir).await
}

async fn read_manifest_scripts(scripts_dir: &Path, manifest: ScriptManifest) -> Vec<ScriptFile> {
    let mut scripts = Vec::with_capacity(manifest.scripts.len());

    for entry in manifest.scripts {
        // Listed files must stay inside the scripts folder
        if entry.file.is_empty() || entry.file.contains(['/', '\\']) || entry.file == ".." {
            warn!("Skipping script manifest entry '{}'", entry.file);
            continue;
        }

        let path = scripts_dir.join(&entry.file);
        let code = match read_optional(&path).await {
            Ok(Some(code)) => code,
            Ok(None) => {
                warn!("Script '{}' listed in manifest is missing", path.display());
                continue;
            }
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };

        scripts.push(ScriptFile {
            name: entry.name.unwrap_or_else(|| entry.file.clone()),
            path: format!("scripts/{}", entry.file),
            code,
            category: entry.category,
            description: entry.description,
        });
    }

    scripts
}

async fn discover_lua_scripts(scripts_dir: &Path) -> Result<Vec<ScriptFile>> {
    let mut entries = match tokio::fs::read_dir(scripts_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to list {}", scripts_dir.display()));
        }
    };

    let mut scripts = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("lua") {
            continue;
        }
        let (Some(file_name), Some(name)) = (
            path.file_name().and_then(|n| n.to_str()),
            path.file_stem().and_then(|s| s.to_str()),
        ) else {
            continue;
        };

        let code = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read script {}", path.display()))?;

        scripts.push(ScriptFile {
            name: name.to_string(),
            path: format!("scripts/{file_name}"),
            code,
            category: Some(AUTO_DISCOVERED_CATEGORY.to_string()),
            description: None,
        });
    }

    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scripts)
}
