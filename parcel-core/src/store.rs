//! Persistence for installed packages
//!
//! The lifecycle writes components, scripts and install records through the
//! `PackageStore` trait. Two stores ship with the crate: an in-memory one
//! and a directory of JSON files.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

/// Component definitions keyed by component id
pub const COMPONENTS_TABLE: &str = "components";
/// Script records keyed by `package_{id}_{name}`
pub const SCRIPTS_TABLE: &str = "lua_scripts";
/// Install records keyed by package id
pub const INSTALLED_TABLE: &str = "installed_packages";

/// Key/value persistence grouped into named tables
#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>>;

    /// Insert or overwrite a record
    async fn set(&self, table: &str, key: &str, value: Value) -> Result<()>;

    async fn get_all(&self, table: &str) -> Result<BTreeMap<String, Value>>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, table: &str, key: &str) -> Result<bool>;
}

type Tables = BTreeMap<String, BTreeMap<String, Value>>;

/// Store kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` and `delete` calls served so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageStore for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    async fn set(&self, table: &str, key: &str, value: Value) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get_all(&self, table: &str) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tables
            .write()
            .await
            .get_mut(table)
            .and_then(|rows| rows.remove(key))
            .is_some())
    }
}

/// Store with one `<table>.json` file per table
pub struct JsonFileStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    async fn read_table(&self, table: &str) -> Result<BTreeMap<String, Value>> {
        let path = self.table_path(table);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_table(&self, table: &str, rows: &BTreeMap<String, Value>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.table_path(table);
        let temp_path = self.dir.join(format!(".{table}.json.tmp"));
        let content = serde_json::to_vec_pretty(rows)?;

        tokio::fs::write(&temp_path, content)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        trace!("Wrote {} rows to {}", rows.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl PackageStore for JsonFileStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_table(table).await?.remove(key))
    }

    async fn set(&self, table: &str, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rows = self.read_table(table).await?;
        rows.insert(key.to_string(), value);
        self.write_table(table, &rows).await
    }

    async fn get_all(&self, table: &str) -> Result<BTreeMap<String, Value>> {
        let _guard = self.lock.lock().await;
        self.read_table(table).await
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut rows = self.read_table(table).await?;
        if rows.remove(key).is_none() {
            return Ok(false);
        }
        self.write_table(table, &rows).await?;
        Ok(true)
    }
}
