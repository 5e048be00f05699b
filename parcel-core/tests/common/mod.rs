//! Shared helpers for parcel-core integration tests

#![allow(dead_code)]

use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Once;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Write a package directory with metadata and components
pub fn write_package(root: &Path, id: &str, version: &str, deps: &[&str], components: &[&str]) {
    let seed_dir = root.join(id).join("seed");
    fs::create_dir_all(&seed_dir).unwrap();

    let metadata = json!({
        "packageId": id,
        "name": id,
        "version": version,
        "category": "test",
        "dependencies": deps,
    });
    fs::write(seed_dir.join("metadata.json"), metadata.to_string()).unwrap();

    let components: Vec<_> = components.iter().map(|c| json!({ "id": c })).collect();
    fs::write(
        seed_dir.join("components.json"),
        serde_json::to_string(&components).unwrap(),
    )
    .unwrap();
}

/// Write `index.json` with the given entries
pub fn write_index(root: &Path, packages: &[serde_json::Value]) {
    fs::write(
        root.join("index.json"),
        json!({ "packages": packages }).to_string(),
    )
    .unwrap();
}
