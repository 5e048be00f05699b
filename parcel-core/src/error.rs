//! Error types for package sources, resolution and the install lifecycle

use thiserror::Error;

/// Result alias used across parcel-core
pub type Result<T> = std::result::Result<T, PackageError>;

/// Errors surfaced by the package registry
#[derive(Error, Debug)]
pub enum PackageError {
    /// A package or source does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A package cannot be installed because some dependencies are absent
    #[error("Package '{package_id}' has unsatisfied dependencies: {}", missing.join(", "))]
    Dependency {
        package_id: String,
        missing: Vec<String>,
    },

    /// The dependency graph of a package contains cycles
    #[error("Circular dependencies detected: {}", format_cycles(cycles))]
    CircularDependency { cycles: Vec<Vec<String>> },

    /// A source could not be reached or returned unusable data
    #[error("Source '{source_id}' unavailable: {message}")]
    SourceUnavailable { source_id: String, message: String },

    /// Repository configuration is malformed
    #[error("Invalid package repository configuration: {0}")]
    Validation(String),

    /// The persistence collaborator failed a write
    #[error("Store operation failed: {message}")]
    Store {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PackageError {
    pub fn package_not_found(id: impl Into<String>) -> Self {
        PackageError::NotFound {
            kind: "Package",
            id: id.into(),
        }
    }

    pub fn source_not_found(id: impl Into<String>) -> Self {
        PackageError::NotFound {
            kind: "Source",
            id: id.into(),
        }
    }

    pub fn source_unavailable(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        PackageError::SourceUnavailable {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>, source: anyhow::Error) -> Self {
        PackageError::Store {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Whether the error means "absent" rather than "broken"
    pub fn is_not_found(&self) -> bool {
        matches!(self, PackageError::NotFound { .. })
    }

    /// Log source failures that are recovered locally
    pub fn log_if_source_failure(&self) {
        if let PackageError::SourceUnavailable { source_id, message } = self {
            tracing::warn!(target: "parcel::sources", "Source '{}' failed: {}", source_id, message);
        }
    }
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| cycle.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}
