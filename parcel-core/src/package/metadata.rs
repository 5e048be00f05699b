//! Package metadata and payload types
//!
//! These are the wire shapes shared by every package source: the index
//! entry (`PackageMetadata`) and the full payload (`PackageData`).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Identity and dependency facts about one package version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    /// Globally unique package key
    pub package_id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Version string (dot-separated numeric segments expected)
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub category: String,

    /// Package ids this package depends on
    #[serde(default, deserialize_with = "deserialize_dependencies")]
    pub dependencies: Vec<String>,

    /// Access tier required to use the package
    #[serde(default = "default_min_level")]
    pub min_level: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Source adapter that produced this entry
    #[serde(default)]
    pub source_id: String,

    /// Integrity value, `sha256:<hex>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

fn default_min_level() -> u32 {
    1
}

/// Dependencies behave as a set: duplicates are dropped, first occurrence wins
fn deserialize_dependencies<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    let mut deps: Vec<String> = Vec::new();
    for dep in raw.unwrap_or_default() {
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    Ok(deps)
}

impl PackageMetadata {
    /// Minimal metadata for a package id with no metadata artifact
    pub fn placeholder(package_id: &str) -> Self {
        Self {
            package_id: package_id.to_string(),
            name: package_id.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            author: String::new(),
            category: "uncategorized".to_string(),
            dependencies: Vec::new(),
            min_level: default_min_level(),
            icon: None,
            source_id: String::new(),
            checksum: None,
        }
    }

    /// Copy of this entry stamped with a source id
    pub fn with_source(mut self, source_id: &str) -> Self {
        self.source_id = source_id.to_string();
        self
    }
}

/// An opaque component definition
///
/// Only `id` is typed; everything else rides along as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,

    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Component {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: Map::new(),
        }
    }

    /// Full JSON record, `id` included
    pub fn to_value(&self) -> Value {
        let mut record = self.properties.clone();
        record.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(record)
    }
}

/// A script file shipped in a package's scripts folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptFile {
    pub name: String,
    pub path: String,
    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Full payload for one resolved package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageData {
    pub metadata: PackageMetadata,

    #[serde(default)]
    pub components: Vec<Component>,

    /// Legacy single-script blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<String>,

    #[serde(default)]
    pub script_files: Vec<ScriptFile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Value>,
}

impl PackageData {
    pub fn new(metadata: PackageMetadata) -> Self {
        Self {
            metadata,
            components: Vec::new(),
            scripts: None,
            script_files: Vec::new(),
            examples: None,
        }
    }

    pub fn package_id(&self) -> &str {
        &self.metadata.package_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_metadata_defaults() {
        let meta: PackageMetadata =
            serde_json::from_str(r#"{"packageId": "forum", "name": "Forum"}"#).unwrap();
        assert_eq!(meta.min_level, 1);
        assert!(meta.dependencies.is_empty());
        assert!(meta.icon.is_none());
        assert_eq!(meta.source_id, "");
    }

    #[test]
    fn test_dependencies_deduplicated() {
        let meta: PackageMetadata = serde_json::from_str(
            r#"{"packageId": "forum", "dependencies": ["auth", "ui", "auth"]}"#,
        )
        .unwrap();
        assert_eq!(meta.dependencies, vec!["auth", "ui"]);
    }

    #[test]
    fn test_unknown_metadata_keys_dropped() {
        let meta: PackageMetadata = serde_json::from_str(
            r#"{"packageId": "forum", "version": "1.0.0", "homepage": "https://forum.dev"}"#,
        )
        .unwrap();
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["packageId"], "forum");
        assert!(value.get("homepage").is_none());
    }

    #[test]
    fn test_component_keeps_free_form_fields() {
        let component: Component = serde_json::from_value(serde_json::json!({
            "id": "forum_thread",
            "type": "Card",
            "props": {"elevation": 2}
        }))
        .unwrap();

        assert_eq!(component.id, "forum_thread");
        assert_eq!(component.properties["type"], "Card");
        assert_eq!(component.properties["props"]["elevation"], 2);

        let value = component.to_value();
        assert_eq!(value["id"], "forum_thread");
        assert_eq!(value["type"], "Card");
    }

    #[test]
    fn test_package_data_camel_case() {
        let data: PackageData = serde_json::from_value(serde_json::json!({
            "metadata": {"packageId": "forum"},
            "components": [{"id": "c1"}],
            "scriptFiles": [{"name": "init", "path": "scripts/init.lua", "code": "return {}"}]
        }))
        .unwrap();

        assert_eq!(data.package_id(), "forum");
        assert_eq!(data.components.len(), 1);
        assert_eq!(data.script_files[0].name, "init");
        assert!(data.scripts.is_none());
        assert!(data.examples.is_none());
    }
}
