//! DBK-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DbkError>;

/// Top-level error type for the dormant-folder backup tool.
#[derive(Debug, Error)]
pub enum DbkError {
    #[error("[DBK-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DBK-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DBK-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DBK-1101] invalid exclusion pattern {pattern:?}: {details}")]
    InvalidPattern { pattern: String, details: String },

    #[error("[DBK-2001] source directory unavailable at {path}: {details}")]
    SourceUnavailable { path: PathBuf, details: String },

    #[error("[DBK-2002] destination unavailable at {path}: {details}")]
    DestinationUnavailable { path: PathBuf, details: String },

    #[error("[DBK-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DBK-2201] manifest parse failure in {path} at line {line}: {details}")]
    ManifestParse {
        path: PathBuf,
        line: usize,
        details: String,
    },

    #[error("[DBK-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[DBK-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DBK-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DbkError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DBK-1001",
            Self::MissingConfig { .. } => "DBK-1002",
            Self::ConfigParse { .. } => "DBK-1003",
            Self::InvalidPattern { .. } => "DBK-1101",
            Self::SourceUnavailable { .. } => "DBK-2001",
            Self::DestinationUnavailable { .. } => "DBK-2002",
            Self::Serialization { .. } => "DBK-2101",
            Self::ManifestParse { .. } => "DBK-2201",
            Self::PermissionDenied { .. } => "DBK-3001",
            Self::Io { .. } => "DBK-3002",
            Self::Runtime { .. } => "DBK-3900",
        }
    }

    /// Whether the destination volume itself ran out of space.
    ///
    /// The runner treats this as a run-wide halt rather than a per-target failure.
    #[must_use]
    pub fn is_storage_full(&self) -> bool {
        matches!(
            self,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::StorageFull
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// Permission failures are mapped to [`DbkError::PermissionDenied`] so
    /// reports name them plainly.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for DbkError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DbkError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
