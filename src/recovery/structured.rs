//! Structured extraction: run a descriptor's deleted-record query read-only.

#![allow(missing_docs)]

use std::path::Path;

use crate::catalog::ArtifactTypeDescriptor;
use crate::core::errors::{BrecError, Result};
use crate::recovery::record::CandidateRecord;

/// Run `descriptor.deleted_query` against the database at `path`.
///
/// Every failure, from "not a database" to "no such table", comes back as
/// `QueryFailed` so the caller can record it and keep carving.
#[cfg(feature = "sqlite")]
pub fn extract_structured(
    path: &Path,
    descriptor: &ArtifactTypeDescriptor,
) -> Result<Vec<CandidateRecord>> {
    if !path.is_file() {
        return Err(BrecError::QueryFailed {
            artifact: descriptor.name.clone(),
            details: format!("{} is not a readable file", path.display()),
        });
    }
    query_rows(path, &descriptor.deleted_query).map_err(|err| BrecError::QueryFailed {
        artifact: descriptor.name.clone(),
        details: match err {
            BrecError::Sql { details, .. } => details,
            other => other.to_string(),
        },
    })
}

#[cfg(not(feature = "sqlite"))]
pub fn extract_structured(
    _path: &Path,
    descriptor: &ArtifactTypeDescriptor,
) -> Result<Vec<CandidateRecord>> {
    Err(BrecError::QueryFailed {
        artifact: descriptor.name.clone(),
        details: "sqlite support not compiled in".to_string(),
    })
}

/// Open an evidence database read-only.
///
/// `immutable=1` keeps SQLite from creating lock or `-shm` files, but it also
/// ignores the WAL. A database with a `-wal` sibling is opened `mode=ro` so
/// commits that were never checkpointed stay visible.
#[cfg(feature = "sqlite")]
pub(crate) fn open_read_only(path: &Path) -> Result<rusqlite::Connection> {
    use rusqlite::{Connection, OpenFlags};

    let escaped = escape_uri_path(path);
    let uri = if wal_sibling(path).is_file() {
        format!("file:{escaped}?mode=ro")
    } else {
        format!("file:{escaped}?mode=ro&immutable=1")
    };
    Ok(Connection::open_with_flags(
        uri,
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

#[cfg(feature = "sqlite")]
fn wal_sibling(path: &Path) -> std::path::PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push("-wal");
    raw.into()
}

#[cfg(feature = "sqlite")]
fn query_rows(path: &Path, query: &str) -> Result<Vec<CandidateRecord>> {
    let conn = open_read_only(path)?;
    let mut stmt = conn.prepare(query)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for idx in 0..columns {
            values.push(render_value(row.get_ref(idx)?));
        }
        out.push(CandidateRecord::structured(
            serde_json::Value::Array(values).to_string(),
        ));
    }
    Ok(out)
}

#[cfg(feature = "sqlite")]
fn render_value(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    use serde_json::Value;

    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("x'{}'", crate::recovery::hex_encode(bytes))),
    }
}

/// Escape the characters SQLite treats specially inside a `file:` URI.
#[cfg(feature = "sqlite")]
fn escape_uri_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '?' => out.push_str("%3f"),
            '#' => out.push_str("%23"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::catalog::ArtifactCatalog;
    use rusqlite::Connection;

    fn notes_descriptor() -> ArtifactTypeDescriptor {
        ArtifactCatalog::default()
            .lookup("Notes")
            .cloned()
            .expect("notes entry")
    }

    fn notes_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ZNOTE (ZTITLE TEXT, ZCREATIONDATE REAL, ZTRASHED INTEGER, ZDATA BLOB);
             INSERT INTO ZNOTE VALUES ('groceries', 700000000.5, 1, x'0a0b');
             INSERT INTO ZNOTE VALUES ('kept', 700000001.0, 0, NULL);
             INSERT INTO ZNOTE VALUES (NULL, NULL, 1, NULL);",
        )
        .unwrap();
    }

    #[test]
    fn deleted_rows_become_high_structured_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Notes.sqlite");
        notes_db(&path);

        let records = extract_structured(&path, &notes_descriptor()).unwrap();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec![r#"["groceries",700000000.5]"#, "[null,null]"]);
        assert!(
            records
                .iter()
                .all(|r| r.confidence == crate::recovery::record::Confidence::High)
        );
    }

    #[test]
    fn blobs_render_as_hex_literals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Notes.sqlite");
        notes_db(&path);
        let mut descriptor = notes_descriptor();
        descriptor.deleted_query = "SELECT ZDATA FROM ZNOTE WHERE ZDATA IS NOT NULL".to_string();

        let records = extract_structured(&path, &descriptor).unwrap();
        assert_eq!(records[0].text, r#"["x'0a0b'"]"#);
    }

    #[test]
    fn missing_table_is_query_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();

        let err = extract_structured(&path, &notes_descriptor()).unwrap_err();
        assert_eq!(err.code(), "BREC-2002");
        assert!(err.to_string().contains("ZNOTE"));
    }

    #[test]
    fn non_database_file_is_query_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.sqlite");
        std::fs::write(&path, b"this is definitely not sqlite, just some note text").unwrap();
        let err = extract_structured(&path, &notes_descriptor()).unwrap_err();
        assert_eq!(err.code(), "BREC-2002");
    }

    #[test]
    fn extraction_leaves_evidence_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Notes.sqlite");
        notes_db(&path);
        let before = std::fs::read(&path).unwrap();
        let _ = extract_structured(&path, &notes_descriptor()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(!dir.path().join("Notes.sqlite-wal").exists());
    }

    #[test]
    fn uncheckpointed_wal_commits_are_visible() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live.sqlite");
        let conn = Connection::open(&live).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let _: i64 = conn
            .query_row("PRAGMA wal_autocheckpoint=0", [], |row| row.get(0))
            .unwrap();
        conn.execute_batch(
            "CREATE TABLE ZNOTE (ZTITLE TEXT, ZCREATIONDATE REAL, ZTRASHED INTEGER);
             INSERT INTO ZNOTE VALUES ('groceries', 700000000.5, 1);",
        )
        .unwrap();

        // Copy while the writer is open so the commit exists only in the WAL.
        let evidence = dir.path().join("Notes.sqlite");
        std::fs::copy(&live, &evidence).unwrap();
        std::fs::copy(wal_sibling(&live), wal_sibling(&evidence)).unwrap();
        drop(conn);
        let before = std::fs::read(&evidence).unwrap();

        let records = extract_structured(&evidence, &notes_descriptor()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, r#"["groceries",700000000.5]"#);
        assert_eq!(std::fs::read(&evidence).unwrap(), before);
    }

    #[test]
    fn missing_path_is_query_failed() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_structured(&dir.path().join("gone.sqlite"), &notes_descriptor())
            .unwrap_err();
        assert_eq!(err.code(), "BREC-2002");
        assert!(err.to_string().contains("not a readable file"));
    }

    #[test]
    fn uri_escaping_covers_reserved_characters() {
        assert_eq!(
            escape_uri_path(Path::new("/tmp/a?b#c%d.db")),
            "/tmp/a%3fb%23c%25d.db"
        );
    }
}
