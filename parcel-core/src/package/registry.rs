//! In-memory package registry
//!
//! A `PackageRegistry` maps package ids to fully loaded definitions. It is
//! what the resolver and the install lifecycle operate on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Component, PackageData, PackageMetadata, ScriptFile};

/// A fully loaded package: metadata plus payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDefinition {
    #[serde(flatten)]
    pub metadata: PackageMetadata,

    #[serde(default)]
    pub components: Vec<Component>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<String>,

    #[serde(default)]
    pub script_files: Vec<ScriptFile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Value>,
}

impl PackageDefinition {
    pub fn package_id(&self) -> &str {
        &self.metadata.package_id
    }

    pub fn dependencies(&self) -> &[String] {
        &self.metadata.dependencies
    }
}

impl From<PackageData> for PackageDefinition {
    fn from(data: PackageData) -> Self {
        Self {
            metadata: data.metadata,
            components: data.components,
            scripts: data.scripts,
            script_files: data.script_files,
            examples: data.examples,
        }
    }
}

impl From<PackageMetadata> for PackageDefinition {
    fn from(metadata: PackageMetadata) -> Self {
        PackageData::new(metadata).into()
    }
}

/// Legacy script blob and script files of one package
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageScripts<'a> {
    pub legacy: &'a str,
    pub files: &'a [ScriptFile],
}

/// Package id -> definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageRegistry {
    packages: BTreeMap<String, PackageDefinition>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a definition keyed by its package id, returning any replaced one
    pub fn insert(&mut self, definition: PackageDefinition) -> Option<PackageDefinition> {
        self.packages
            .insert(definition.package_id().to_string(), definition)
    }

    pub fn get(&self, package_id: &str) -> Option<&PackageDefinition> {
        self.packages.get(package_id)
    }

    pub fn contains(&self, package_id: &str) -> bool {
        self.packages.contains_key(package_id)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Package ids in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageDefinition> {
        self.packages.values()
    }

    /// All packages in a category
    pub fn by_category(&self, category: &str) -> Vec<&PackageDefinition> {
        self.packages
            .values()
            .filter(|p| p.metadata.category == category)
            .collect()
    }

    /// Components of a package (empty when the package is unknown)
    pub fn components(&self, package_id: &str) -> &[Component] {
        self.get(package_id)
            .map(|p| p.components.as_slice())
            .unwrap_or(&[])
    }

    /// Legacy script blob of a package (empty string when absent)
    pub fn scripts(&self, package_id: &str) -> &str {
        self.get(package_id)
            .and_then(|p| p.scripts.as_deref())
            .unwrap_or("")
    }

    pub fn script_files(&self, package_id: &str) -> &[ScriptFile] {
        self.get(package_id)
            .map(|p| p.script_files.as_slice())
            .unwrap_or(&[])
    }

    pub fn all_scripts(&self, package_id: &str) -> PackageScripts<'_> {
        PackageScripts {
            legacy: self.scripts(package_id),
            files: self.script_files(package_id),
        }
    }

    /// Examples document of a package (empty object when absent)
    pub fn examples(&self, package_id: &str) -> Value {
        self.get(package_id)
            .and_then(|p| p.examples.clone())
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

impl FromIterator<PackageDefinition> for PackageRegistry {
    fn from_iter<I: IntoIterator<Item = PackageDefinition>>(iter: I) -> Self {
        let mut registry = PackageRegistry::new();
        for definition in iter {
            registry.insert(definition);
        }
        registry
    }
}

impl Extend<PackageDefinition> for PackageRegistry {
    fn extend<I: IntoIterator<Item = PackageDefinition>>(&mut self, iter: I) {
        for definition in iter {
            self.insert(definition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(id: &str, category: &str) -> PackageDefinition {
        let mut meta = PackageMetadata::placeholder(id);
        meta.category = category.to_string();
        meta.into()
    }

    #[test]
    fn test_by_category() {
        let registry: PackageRegistry = vec![
            package("pkg1", "ui"),
            package("pkg2", "ui"),
            package("pkg3", "data"),
        ]
        .into_iter()
        .collect();

        assert_eq!(registry.by_category("ui").len(), 2);
        assert_eq!(registry.by_category("data").len(), 1);
        assert!(registry.by_category("unknown").is_empty());
        assert!(PackageRegistry::new().by_category("ui").is_empty());
    }

    #[test]
    fn test_payload_accessors_on_missing_fields() {
        let registry: PackageRegistry = vec![package("bare", "ui")].into_iter().collect();

        assert!(registry.components("bare").is_empty());
        assert_eq!(registry.scripts("bare"), "");
        assert!(registry.script_files("bare").is_empty());
        assert_eq!(registry.examples("bare"), serde_json::json!({}));

        // Unknown packages behave like empty ones
        assert!(registry.components("ghost").is_empty());
        assert_eq!(registry.scripts("ghost"), "");
    }

    #[test]
    fn test_all_scripts() {
        let mut definition = package("scripted", "ui");
        definition.scripts = Some("legacy code".to_string());
        definition.script_files = vec![ScriptFile {
            name: "init".to_string(),
            path: "scripts/init.lua".to_string(),
            code: "return {}".to_string(),
            category: None,
            description: None,
        }];
        let registry: PackageRegistry = vec![definition].into_iter().collect();

        let scripts = registry.all_scripts("scripted");
        assert_eq!(scripts.legacy, "legacy code");
        assert_eq!(scripts.files.len(), 1);
    }

    #[test]
    fn test_definition_serializes_flat() {
        let definition = package("forum", "social");
        let value = serde_json::to_value(&definition).unwrap();
        assert_eq!(value["packageId"], "forum");
        assert_eq!(value["category"], "social");
        assert!(value["components"].as_array().unwrap().is_empty());
    }
}
