//! File-status repository: one append-only table per job.
//!
//! Each job's statuses live in `statuses_<job id as 32 hex digits>`, created
//! on first write. Keeping them out of the job document keeps the aggregate
//! small and lets status writes proceed without the job store lock.

use rusqlite::params;
use uuid::Uuid;

use super::error::is_valid_identifier;
use super::migrations::table_exists;
use super::{Database, DatabaseError};

const NAMESPACE_PREFIX: &str = "statuses_";

/// A raw status row.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    pub message_guid: String,
    pub anonymised_file_name: String,
    pub status: String,
    pub status_message: Option<String>,
    pub producer_identity: String,
    pub received_at: String,
}

/// Returns the status table name for a job.
pub fn namespace_for(job_id: &Uuid) -> String {
    format!("{}{}", NAMESPACE_PREFIX, job_id.simple())
}

/// Parses a job id back out of a status table name.
pub fn job_id_from_namespace(name: &str) -> Option<Uuid> {
    name.strip_prefix(NAMESPACE_PREFIX)
        .and_then(|suffix| Uuid::parse_str(suffix).ok())
}

fn checked_namespace(job_id: &Uuid) -> Result<String, DatabaseError> {
    let name = namespace_for(job_id);
    if !is_valid_identifier(&name) {
        return Err(DatabaseError::InvalidIdentifier(name));
    }
    Ok(name)
}

/// Appends a status row, creating the namespace if needed.
///
/// Returns false if a row with the same `message_guid` was already stored
/// (a redelivered message).
pub fn append(db: &Database, job_id: &Uuid, row: &StatusRow) -> Result<bool, DatabaseError> {
    let table = checked_namespace(job_id)?;
    db.with_conn(|conn| {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                message_guid TEXT PRIMARY KEY NOT NULL,
                anonymised_file_name TEXT NOT NULL,
                status TEXT NOT NULL,
                status_message TEXT,
                producer_identity TEXT NOT NULL,
                received_at TEXT NOT NULL
            );",
            table
        ))?;

        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (message_guid, anonymised_file_name, status,
                 status_message, producer_identity, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                table
            ),
            params![
                row.message_guid,
                row.anonymised_file_name,
                row.status,
                row.status_message,
                row.producer_identity,
                row.received_at,
            ],
        )?;
        Ok(inserted == 1)
    })
}

/// Returns every status row for a job in arrival order. A job with no
/// namespace yet has no statuses.
pub fn scan(db: &Database, job_id: &Uuid) -> Result<Vec<StatusRow>, DatabaseError> {
    let table = checked_namespace(job_id)?;
    db.with_conn(|conn| {
        if !table_exists(conn, &table)? {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT message_guid, anonymised_file_name, status, status_message,
             producer_identity, received_at FROM {} ORDER BY rowid ASC",
            table
        ))?;
        let rows = stmt
            .query_map([], |r| {
                Ok(StatusRow {
                    message_guid: r.get(0)?,
                    anonymised_file_name: r.get(1)?,
                    status: r.get(2)?,
                    status_message: r.get(3)?,
                    producer_identity: r.get(4)?,
                    received_at: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Drops a job's namespace. Returns whether it existed.
pub fn drop_namespace(db: &Database, job_id: &Uuid) -> Result<bool, DatabaseError> {
    let table = checked_namespace(job_id)?;
    db.with_conn(|conn| {
        let existed = table_exists(conn, &table)?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
        Ok(existed)
    })
}

/// Returns true if the job has a status namespace.
pub fn namespace_exists(db: &Database, job_id: &Uuid) -> Result<bool, DatabaseError> {
    let table = checked_namespace(job_id)?;
    db.with_conn(|conn| table_exists(conn, &table))
}

/// Lists the job ids of every existing status namespace.
pub fn list_namespaces(db: &Database) -> Result<Vec<Uuid>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name LIKE 'statuses\\_%' ESCAPE '\\'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names
            .iter()
            .filter_map(|n| job_id_from_namespace(n))
            .collect())
    })
}
