//! BREC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, BrecError>;

/// Top-level error type for the recovery engine.
#[derive(Debug, Error)]
pub enum BrecError {
    #[error("[BREC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[BREC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[BREC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[BREC-2001] acquisition unavailable for {artifact}: {details}")]
    AcquisitionUnavailable { artifact: String, details: String },

    #[error("[BREC-2002] structured query failed for {artifact}: {details}")]
    QueryFailed { artifact: String, details: String },

    #[error("[BREC-2003] carve read failure at {path}: {source}")]
    CarveIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[BREC-2004] relevance classifier unavailable: {reason}")]
    ClassifierUnavailable { reason: String },

    #[error("[BREC-2005] unsupported artifact type: {name}")]
    UnsupportedArtifact { name: String },

    #[error("[BREC-2006] scan cancelled before {artifact} started")]
    Cancelled { artifact: String },

    #[error("[BREC-2101] classifier training failure: {details}")]
    Training { details: String },

    #[error("[BREC-2901] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[BREC-2902] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[BREC-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[BREC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl BrecError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "BREC-1001",
            Self::MissingConfig { .. } => "BREC-1002",
            Self::ConfigParse { .. } => "BREC-1003",
            Self::AcquisitionUnavailable { .. } => "BREC-2001",
            Self::QueryFailed { .. } => "BREC-2002",
            Self::CarveIo { .. } => "BREC-2003",
            Self::ClassifierUnavailable { .. } => "BREC-2004",
            Self::UnsupportedArtifact { .. } => "BREC-2005",
            Self::Cancelled { .. } => "BREC-2006",
            Self::Training { .. } => "BREC-2101",
            Self::Serialization { .. } => "BREC-2901",
            Self::Sql { .. } => "BREC-2902",
            Self::Io { .. } => "BREC-3001",
            Self::Runtime { .. } => "BREC-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionUnavailable { .. }
                | Self::CarveIo { .. }
                | Self::Io { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for BrecError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for BrecError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for BrecError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
