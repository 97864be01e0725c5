//! Acquisition seam: turn an artifact descriptor into a readable local file.
//!
//! Transports (device, backup service, cloud) live outside this crate. The
//! sources here cover standard backups with a `Manifest.db`, already-extracted
//! trees and single files, and they never fabricate a database when one is
//! missing.

#![allow(missing_docs)]

#[cfg(feature = "sqlite")]
mod manifest;

#[cfg(feature = "sqlite")]
pub use manifest::{MANIFEST_FILE, ManifestSource};

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::catalog::ArtifactTypeDescriptor;
use crate::core::errors::{BrecError, Result};

/// Directory depth searched for a basename fallback match.
const MAX_SEARCH_DEPTH: usize = 16;

/// Yields the local database file for an artifact type.
pub trait ArtifactSource: Send + Sync {
    fn acquire(&self, descriptor: &ArtifactTypeDescriptor) -> Result<AcquiredFile>;

    /// Short human description for logs and reports.
    fn describe(&self) -> String;
}

impl<S: ArtifactSource + ?Sized> ArtifactSource for Box<S> {
    fn acquire(&self, descriptor: &ArtifactTypeDescriptor) -> Result<AcquiredFile> {
        (**self).acquire(descriptor)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// A local file handed to the engine for one artifact type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredFile {
    path: PathBuf,
    temporary: bool,
}

impl AcquiredFile {
    /// A file the engine must leave in place.
    pub fn original(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    /// A scratch copy, deleted by `release`.
    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Delete the file if it is a temporary copy.
    pub fn release(self) -> Result<()> {
        if !self.temporary {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BrecError::io(&self.path, source)),
        }
    }
}

fn unavailable(descriptor: &ArtifactTypeDescriptor, details: impl Into<String>) -> BrecError {
    BrecError::AcquisitionUnavailable {
        artifact: descriptor.name.clone(),
        details: details.into(),
    }
}

// ──────────────────── directory tree ────────────────────

/// An extracted backup tree, e.g. a decoded iTunes/Finder backup.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|source| BrecError::io(&root, source))?;
        if !meta.is_dir() {
            return Err(BrecError::InvalidConfig {
                details: format!("source root {} is not a directory", root.display()),
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn find_by_basename(&self, basename: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut stack = vec![(self.root.clone(), 0usize)];
        while let Some((dir, depth)) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            let mut entries: Vec<_> = entries.filter_map(std::result::Result::ok).collect();
            entries.sort_by_key(fs::DirEntry::file_name);
            for entry in entries {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                // Symlinks are skipped so the search stays inside the tree.
                if file_type.is_dir() && depth < MAX_SEARCH_DEPTH {
                    stack.push((entry.path(), depth + 1));
                } else if file_type.is_file() && entry.file_name() == basename {
                    found.push(entry.path());
                }
            }
        }
        found.sort();
        found
    }
}

impl ArtifactSource for DirectorySource {
    fn acquire(&self, descriptor: &ArtifactTypeDescriptor) -> Result<AcquiredFile> {
        let relative = Path::new(&descriptor.acquisition_path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(unavailable(
                descriptor,
                format!(
                    "acquisition path {:?} must stay inside the source root",
                    descriptor.acquisition_path
                ),
            ));
        }

        let direct = self.root.join(relative);
        if direct.is_file() {
            return Ok(AcquiredFile::original(direct));
        }

        let Some(basename) = relative.file_name().and_then(|n| n.to_str()) else {
            return Err(unavailable(descriptor, "acquisition path has no file name"));
        };
        let mut matches = self.find_by_basename(basename);
        match matches.len() {
            0 => Err(unavailable(
                descriptor,
                format!("{basename} not found under {}", self.root.display()),
            )),
            1 => Ok(AcquiredFile::original(matches.remove(0))),
            n => Err(unavailable(
                descriptor,
                format!(
                    "{n} files named {basename} under {}; expected {}",
                    self.root.display(),
                    direct.display()
                ),
            )),
        }
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

// ──────────────────── single file ────────────────────

/// One database file used for every requested type.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArtifactSource for FileSource {
    fn acquire(&self, descriptor: &ArtifactTypeDescriptor) -> Result<AcquiredFile> {
        if self.path.is_file() {
            Ok(AcquiredFile::original(&self.path))
        } else {
            Err(unavailable(
                descriptor,
                format!("{} is not a readable file", self.path.display()),
            ))
        }
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

// ──────────────────── staged copies ────────────────────

/// Copies whatever `inner` acquires into a staging directory so scans never
/// touch the original. Staged copies are temporary.
pub struct StagedSource<S> {
    inner: S,
    staging_dir: PathBuf,
    counter: AtomicU64,
}

impl<S: ArtifactSource> StagedSource<S> {
    pub fn new(inner: S, staging_dir: impl Into<PathBuf>) -> Result<Self> {
        let staging_dir = staging_dir.into();
        fs::create_dir_all(&staging_dir).map_err(|source| BrecError::io(&staging_dir, source))?;
        Ok(Self {
            inner,
            staging_dir,
            counter: AtomicU64::new(0),
        })
    }
}

impl<S: ArtifactSource> ArtifactSource for StagedSource<S> {
    fn acquire(&self, descriptor: &ArtifactTypeDescriptor) -> Result<AcquiredFile> {
        let original = self.inner.acquire(descriptor)?;
        let basename = original
            .path()
            .file_name()
            .map_or_else(|| "artifact.db".into(), |n| n.to_string_lossy().into_owned());
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let staged = self.staging_dir.join(format!("{seq:04}-{basename}"));

        let copied = fs::copy(original.path(), &staged);
        // The inner file may itself be a temporary; release it either way.
        let released = original.release();
        copied.map_err(|e| unavailable(descriptor, format!("staging copy failed: {e}")))?;
        released?;
        Ok(AcquiredFile::temporary(staged))
    }

    fn describe(&self) -> String {
        format!(
            "{} (staged in {})",
            self.inner.describe(),
            self.staging_dir.display()
        )
    }
}
