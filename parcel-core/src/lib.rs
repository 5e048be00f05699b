//! Parcel library exports
//!
//! Package sources and their merged catalog, dependency resolution, registry
//! bootstrap and the install lifecycle.

pub mod builder;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod package;
pub mod resolver;
pub mod source;
pub mod store;

pub use builder::{BootstrapState, RegistryBootstrap, RegistryBuilder};
pub use config::{ConfigEnv, PackageRepoConfig};
pub use error::{PackageError, Result};
pub use package::{PackageData, PackageDefinition, PackageMetadata, PackageRegistry};
pub use source::{ConflictResolution, PackageSource, PackageSourceConfig, SourceManager, SourceType};
pub use store::{JsonFileStore, MemoryStore, PackageStore};

#[cfg(test)]
mod tests;
