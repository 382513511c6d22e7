//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// An insert collided with an existing primary key.
    #[error("Document with key '{key}' already exists in '{table}'")]
    DuplicateKey { table: String, key: String },

    /// A table or column name failed identifier validation.
    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),
}

impl DatabaseError {
    /// Maps a unique/primary-key constraint failure to [`DatabaseError::DuplicateKey`].
    pub(crate) fn from_insert(err: rusqlite::Error, table: &str, key: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::DuplicateKey {
                    table: table.to_string(),
                    key: key.to_string(),
                }
            }
            _ => DatabaseError::Sqlite(err),
        }
    }
}

/// Returns true when `name` is safe to splice into SQL as an identifier.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}
