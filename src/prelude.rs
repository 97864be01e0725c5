//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use backup_recovery::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{BrecError, Result};

// Catalog and acquisition
pub use crate::acquisition::{AcquiredFile, ArtifactSource, DirectorySource, FileSource};
#[cfg(feature = "sqlite")]
pub use crate::acquisition::ManifestSource;
pub use crate::catalog::{ArtifactCatalog, ArtifactTypeDescriptor};

// Events
pub use crate::logger::events::{EventLoggerHandle, EventSink, NullSink, ScanEvent};

// Recovery
pub use crate::recovery::classifier::RelevanceScorer;
pub use crate::recovery::engine::{CancelToken, RecoveryEngine};
pub use crate::recovery::features::FeatureVector;
pub use crate::recovery::record::{
    ArtifactRecovery, CandidateRecord, Confidence, RecordSource, RecoveryIssue, ScanResult,
};
