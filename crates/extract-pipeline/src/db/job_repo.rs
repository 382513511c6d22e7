//! Job document repository: single-statement operations on the active,
//! archive and quarantine collections.
//!
//! Each function is atomic on its own. Nothing here spans two collections;
//! moving a job between collections is two calls and is not atomic.

use std::fmt;

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// The three job collections. A job id lives in at most one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Active,
    Archive,
    Quarantine,
}

impl Collection {
    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            Collection::Active => "extract_jobs",
            Collection::Archive => "extract_job_archive",
            Collection::Quarantine => "extract_job_quarantine",
        }
    }

    pub const ALL: [Collection; 3] = [
        Collection::Active,
        Collection::Archive,
        Collection::Quarantine,
    ];
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collection::Active => "active",
            Collection::Archive => "archive",
            Collection::Quarantine => "quarantine",
        };
        f.write_str(name)
    }
}

/// A raw job document row.
///
/// `status` duplicates the document's status so the ready query can filter
/// without parsing every document. `cause` is only set in the quarantine.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDocumentRow {
    pub job_id: String,
    pub status: String,
    pub document: String,
    pub recorded_at: String,
    pub cause: Option<String>,
}

impl JobDocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            status: row.get("status")?,
            document: row.get("document")?,
            recorded_at: row.get("recorded_at")?,
            cause: row.get("cause")?,
        })
    }
}

/// Inserts a document. A second insert for the same id fails with
/// [`DatabaseError::DuplicateKey`].
pub fn insert(db: &Database, collection: Collection, row: &JobDocumentRow) -> Result<(), DatabaseError> {
    let table = collection.table();
    db.with_conn(|conn| {
        conn.execute(
            &format!(
                "INSERT INTO {} (job_id, status, document, recorded_at, cause)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                table
            ),
            params![row.job_id, row.status, row.document, row.recorded_at, row.cause],
        )
        .map_err(|e| DatabaseError::from_insert(e, table, &row.job_id))?;
        Ok(())
    })
}

/// Replaces the whole document for an existing id. Returns false when no row matched.
pub fn replace(db: &Database, collection: Collection, row: &JobDocumentRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET status = ?2, document = ?3, recorded_at = ?4, cause = ?5
                 WHERE job_id = ?1",
                collection.table()
            ),
            params![row.job_id, row.status, row.document, row.recorded_at, row.cause],
        )?;
        Ok(updated == 1)
    })
}

/// Deletes a document. Returns whether a row was removed.
pub fn delete(db: &Database, collection: Collection, job_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE job_id = ?1", collection.table()),
            params![job_id],
        )?;
        Ok(deleted == 1)
    })
}

/// Finds a document by job id.
pub fn find_by_id(
    db: &Database,
    collection: Collection,
    job_id: &str,
) -> Result<Option<JobDocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE job_id = ?1", collection.table()),
                params![job_id],
                JobDocumentRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Returns true if the collection holds a document for the id.
pub fn exists(db: &Database, collection: Collection, job_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE job_id = ?1", collection.table()),
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Finds all documents with the given indexed status, optionally for one id.
pub fn find_by_status(
    db: &Database,
    collection: Collection,
    status: &str,
    job_id: Option<&str>,
) -> Result<Vec<JobDocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let table = collection.table();
        let rows = match job_id {
            Some(id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT * FROM {} WHERE status = ?1 AND job_id = ?2",
                    table
                ))?;
                let rows = stmt
                    .query_map(params![status, id], JobDocumentRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT * FROM {} WHERE status = ?1 ORDER BY recorded_at ASC",
                    table
                ))?;
                let rows = stmt
                    .query_map(params![status], JobDocumentRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}

/// Counts documents in a collection.
pub fn count(db: &Database, collection: Collection) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", collection.table()),
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Lists every job id in a collection.
pub fn list_ids(db: &Database, collection: Collection) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT job_id FROM {} ORDER BY job_id",
            collection.table()
        ))?;
        let ids = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}
