//! Artifact catalog: immutable registry of recoverable artifact types with
//! their acquisition hints, deleted-record queries, and carving signatures.

#![allow(missing_docs)]

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::errors::{BrecError, Result};

/// Declarative description of one artifact type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactTypeDescriptor {
    pub name: String,
    /// Relative path hint on the source filesystem. Only acquisition reads it.
    pub acquisition_path: String,
    pub primary_table: String,
    /// Selects rows considered deleted or orphaned. May fail on schemas from
    /// other OS versions; that is a recorded outcome, not a fatal one.
    pub deleted_query: String,
    /// Lowercase keywords, sorted and deduplicated.
    pub carve_signatures: Vec<String>,
}

impl ArtifactTypeDescriptor {
    fn new(
        name: &str,
        acquisition_path: &str,
        primary_table: &str,
        deleted_query: &str,
        carve_signatures: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            acquisition_path: acquisition_path.to_string(),
            primary_table: primary_table.to_string(),
            deleted_query: deleted_query.to_string(),
            carve_signatures: normalize_signatures(carve_signatures.iter().copied()),
        }
    }

    /// Types without signatures are never raw-carved.
    #[must_use]
    pub fn is_carvable(&self) -> bool {
        !self.carve_signatures.is_empty()
    }
}

/// User-provided catalog extension loaded from `[[catalog.custom]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDescriptor {
    pub name: String,
    pub acquisition_path: String,
    pub primary_table: String,
    pub deleted_query: String,
    #[serde(default)]
    pub carve_signatures: Vec<String>,
}

impl From<&CustomDescriptor> for ArtifactTypeDescriptor {
    fn from(custom: &CustomDescriptor) -> Self {
        Self {
            name: custom.name.trim().to_string(),
            acquisition_path: custom.acquisition_path.clone(),
            primary_table: custom.primary_table.clone(),
            deleted_query: custom.deleted_query.clone(),
            carve_signatures: normalize_signatures(
                custom.carve_signatures.iter().map(String::as_str),
            ),
        }
    }
}

/// Read-only lookup table keyed by artifact name.
///
/// Entry order is stable: built-ins in catalog order, then custom additions in
/// the order they were supplied.
#[derive(Debug, Clone)]
pub struct ArtifactCatalog {
    entries: Vec<ArtifactTypeDescriptor>,
}

impl Default for ArtifactCatalog {
    fn default() -> Self {
        Self {
            entries: builtin_descriptors(),
        }
    }
}

impl ArtifactCatalog {
    /// Merge custom descriptors into the catalog.
    ///
    /// A custom name matching a built-in replaces it in place. Two custom
    /// entries sharing a name are rejected.
    pub fn with_custom(mut self, custom: &[CustomDescriptor]) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in custom {
            validate_custom(entry)?;
            let descriptor = ArtifactTypeDescriptor::from(entry);
            if !seen.insert(descriptor.name.clone()) {
                return Err(BrecError::InvalidConfig {
                    details: format!(
                        "catalog.custom contains duplicate name {:?}",
                        descriptor.name
                    ),
                });
            }
            if let Some(existing) = self
                .entries
                .iter_mut()
                .find(|existing| existing.name == descriptor.name)
            {
                *existing = descriptor;
            } else {
                self.entries.push(descriptor);
            }
        }
        Ok(self)
    }

    /// Exact-name lookup. `None` means the caller should skip the type.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&ArtifactTypeDescriptor> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactTypeDescriptor> {
        self.entries.iter()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_custom(entry: &CustomDescriptor) -> Result<()> {
    if entry.name.trim().is_empty() {
        return Err(BrecError::InvalidConfig {
            details: "catalog.custom entries need a non-empty name".to_string(),
        });
    }
    if entry.deleted_query.trim().is_empty() {
        return Err(BrecError::InvalidConfig {
            details: format!("catalog.custom {:?} has an empty deleted_query", entry.name),
        });
    }
    if entry.acquisition_path.trim().is_empty() {
        return Err(BrecError::InvalidConfig {
            details: format!(
                "catalog.custom {:?} has an empty acquisition_path",
                entry.name
            ),
        });
    }
    Ok(())
}

fn normalize_signatures<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut signatures: Vec<String> = raw
        .map(|sig| sig.trim().to_lowercase())
        .filter(|sig| !sig.is_empty())
        .collect();
    signatures.sort();
    signatures.dedup();
    signatures
}

fn builtin_descriptors() -> Vec<ArtifactTypeDescriptor> {
    vec![
        ArtifactTypeDescriptor::new(
            "Messages",
            "Library/SMS/sms.db",
            "message",
            "SELECT text, date, handle_id FROM message WHERE is_deleted=1 OR date IS NULL",
            &["message", "sms", "text"],
        ),
        // Deleted contacts mostly survive only in the WAL; the live table is a stand-in.
        ArtifactTypeDescriptor::new(
            "Contacts",
            "Library/AddressBook/AddressBook.sqlitedb",
            "ABPerson",
            "SELECT First, Last, Organization FROM ABPerson",
            &["vcard", "contact"],
        ),
        ArtifactTypeDescriptor::new(
            "Call History",
            "Library/CallHistoryDB/CallHistory.storedata",
            "ZCALLRECORD",
            "SELECT ZADDRESS, ZDATE, ZDURATION FROM ZCALLRECORD WHERE Z_OPT > 1",
            &["call", "duration"],
        ),
        ArtifactTypeDescriptor::new(
            "Notes",
            "Library/Notes/Notes.sqlite",
            "ZNOTE",
            "SELECT ZTITLE, ZCREATIONDATE FROM ZNOTE WHERE ZTRASHED=1",
            &["note", "body"],
        ),
        ArtifactTypeDescriptor::new(
            "Photos (Metadata)",
            "Media/PhotoData/Photos.sqlite",
            "ZASSET",
            "SELECT ZFILENAME, ZDATECREATED FROM ZASSET WHERE ZTRASHEDSTATE=1",
            &["IMG_", "JPG"],
        ),
        ArtifactTypeDescriptor::new(
            "Safari History",
            "Library/Safari/History.db",
            "history_items",
            "SELECT url, visit_count FROM history_items",
            &["http", "https"],
        ),
        ArtifactTypeDescriptor::new(
            "Calendar",
            "Library/Calendar/Calendar.sqlitedb",
            "CalendarItem",
            "SELECT summary, start_date FROM CalendarItem",
            &["event", "meeting"],
        ),
        // Lives in an app group container; the hint is a basename only.
        ArtifactTypeDescriptor::new(
            "WhatsApp",
            "ChatStorage.sqlite",
            "ZWAMESSAGE",
            "SELECT ZTEXT, ZMESSAGEDATE FROM ZWAMESSAGE WHERE ZISDELETED=1",
            &["whatsapp"],
        ),
    ]
}
