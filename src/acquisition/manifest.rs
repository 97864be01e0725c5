//! Standard (unencrypted) device backups: files are stored under hashed
//! names and located through the `Files` table of `Manifest.db`.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};

use super::{AcquiredFile, ArtifactSource, unavailable};
use crate::catalog::ArtifactTypeDescriptor;
use crate::core::errors::{BrecError, Result};
use crate::recovery::structured::open_read_only;

/// Manifest database at the root of a standard backup.
pub const MANIFEST_FILE: &str = "Manifest.db";

/// `Files.flags` value for a regular file.
const FLAG_FILE: i64 = 1;

/// One `Files` row that may back an artifact type.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestEntry {
    file_id: String,
    domain: String,
    relative_path: String,
}

/// A backup directory resolved through its `Manifest.db`.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    root: PathBuf,
    manifest: PathBuf,
}

impl ManifestSource {
    /// Open `root`, which must contain a readable `Manifest.db` with a
    /// `Files` table.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let manifest = root.join(MANIFEST_FILE);
        if !manifest.is_file() {
            return Err(BrecError::InvalidConfig {
                details: format!("{} not found", manifest.display()),
            });
        }
        let conn = open_read_only(&manifest)?;
        conn.prepare("SELECT fileID, domain, relativePath, flags FROM Files LIMIT 1")?;
        Ok(Self { root, manifest })
    }

    /// True when `root` looks like a standard backup rather than an
    /// extracted tree.
    #[must_use]
    pub fn is_backup_root(root: &Path) -> bool {
        root.join(MANIFEST_FILE).is_file()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entries(&self, descriptor: &ArtifactTypeDescriptor) -> Result<Vec<ManifestEntry>> {
        let conn = open_read_only(&self.manifest)?;
        let hint = descriptor.acquisition_path.trim_start_matches('/');

        let exact = query_entries(
            &conn,
            "SELECT fileID, domain, relativePath FROM Files
             WHERE flags = ?1 AND relativePath = ?2
             ORDER BY domain, relativePath",
            params![FLAG_FILE, hint],
        )?;
        if !exact.is_empty() {
            return Ok(exact);
        }

        let Some(basename) = Path::new(hint).file_name().and_then(|n| n.to_str()) else {
            return Ok(Vec::new());
        };
        query_entries(
            &conn,
            "SELECT fileID, domain, relativePath FROM Files
             WHERE flags = ?1 AND (relativePath = ?2 OR relativePath LIKE ?3 ESCAPE '\\')
             ORDER BY domain, relativePath",
            params![FLAG_FILE, basename, format!("%/{}", escape_like(basename))],
        )
    }

    /// Hashed storage location: `<root>/<id[..2]>/<id>`, or `<root>/<id>` for
    /// older backups.
    fn stored_path(&self, file_id: &str) -> Option<PathBuf> {
        let nested = file_id
            .get(..2)
            .map(|prefix| self.root.join(prefix).join(file_id));
        nested
            .into_iter()
            .chain(std::iter::once(self.root.join(file_id)))
            .find(|candidate| candidate.is_file())
    }
}

impl ArtifactSource for ManifestSource {
    fn acquire(&self, descriptor: &ArtifactTypeDescriptor) -> Result<AcquiredFile> {
        let mut entries = self
            .entries(descriptor)
            .map_err(|e| unavailable(descriptor, format!("manifest lookup failed: {e}")))?;
        let entry = match entries.len() {
            0 => {
                return Err(unavailable(
                    descriptor,
                    format!(
                        "{} not listed in {}",
                        descriptor.acquisition_path,
                        self.manifest.display()
                    ),
                ));
            }
            1 => entries.remove(0),
            n => {
                let listed: Vec<String> = entries
                    .iter()
                    .map(|e| format!("{}-{}", e.domain, e.relative_path))
                    .collect();
                return Err(unavailable(
                    descriptor,
                    format!("{n} manifest entries match: {}", listed.join(", ")),
                ));
            }
        };

        if entry.file_id.is_empty() || !entry.file_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(unavailable(
                descriptor,
                format!("manifest fileID {:?} is not a hash", entry.file_id),
            ));
        }
        self.stored_path(&entry.file_id)
            .map(AcquiredFile::original)
            .ok_or_else(|| {
                unavailable(
                    descriptor,
                    format!(
                        "{}-{} ({}) is missing from the backup",
                        entry.domain, entry.relative_path, entry.file_id
                    ),
                )
            })
    }

    fn describe(&self) -> String {
        format!("backup {}", self.root.display())
    }
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<ManifestEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, |row| {
        Ok(ManifestEntry {
            file_id: row.get(0)?,
            domain: row.get(1)?,
            relative_path: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
