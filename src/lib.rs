#![forbid(unsafe_code)]

//! Backup Recovery (brec) recovers deleted artifacts from the SQLite
//! databases of a mobile device backup.
//!
//! Each artifact type is recovered two ways and merged:
//! 1. **Structured extraction**: the type's deleted-record query, run read-only
//! 2. **Raw carving**: printable runs pulled from the file's bytes, scored by a
//!    small classifier trained fresh every session
//!
//! # Library usage
//!
//! ```rust,no_run
//! use backup_recovery::prelude::*;
//!
//! let engine = RecoveryEngine::from_config(Config::default())?;
//! let source = DirectorySource::new("/evidence/backup")?;
//! let result = engine.scan(&engine.catalog().names(), &source);
//! println!("{} candidates", result.total_candidates());
//! # Ok::<(), BrecError>(())
//! ```

pub mod prelude;

pub mod acquisition;
pub mod catalog;
pub mod core;
pub mod logger;
pub mod recovery;
