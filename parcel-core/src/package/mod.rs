//! Package data model
//!
//! Metadata, payloads and the in-memory registry shared by every other
//! module.

mod metadata;
mod registry;
pub(crate) mod seed;

pub use metadata::{Component, PackageData, PackageMetadata, ScriptFile};
pub use registry::{PackageDefinition, PackageRegistry, PackageScripts};
