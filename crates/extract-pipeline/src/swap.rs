//! Identifier swap cache.
//!
//! Holds the whole private-to-release identifier mapping in memory. Readers
//! share one immutable map; [`IdentifierSwapCache::reload`] builds a new map
//! and replaces it in one step, so a lookup never sees a half-built mapping.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::IdentifierMappingConfig;
use crate::db::error::is_valid_identifier;
use crate::db::{Database, DatabaseError};

/// Errors raised while loading a mapping.
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid mapping table identifier: {0}")]
    InvalidIdentifier(String),

    /// The mapping table maps one value to two replacements.
    #[error("Value '{0}' appears more than once in the mapping table")]
    DuplicateValue(String),
}

/// Result of looking a value up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    Found(String),
    Missing { reason: String },
}

/// Something a full mapping can be read from.
pub trait MappingSource: Send + Sync {
    fn load(&self) -> Result<HashMap<String, String>, SwapError>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// Reads `(swap column, replacement column)` pairs from a SQLite table.
#[derive(Clone)]
pub struct SqliteMappingSource {
    db: Database,
    table: String,
    swap_column: String,
    replacement_column: String,
}

impl SqliteMappingSource {
    pub fn new(
        db: Database,
        table: &str,
        swap_column: &str,
        replacement_column: &str,
    ) -> Result<Self, SwapError> {
        for name in [table, swap_column, replacement_column] {
            if !is_valid_identifier(name) {
                return Err(SwapError::InvalidIdentifier(name.to_string()));
            }
        }
        Ok(Self {
            db,
            table: table.to_string(),
            swap_column: swap_column.to_string(),
            replacement_column: replacement_column.to_string(),
        })
    }

    pub fn from_config(db: Database, config: &IdentifierMappingConfig) -> Result<Self, SwapError> {
        Self::new(
            db,
            &config.table,
            &config.swap_column,
            &config.replacement_column,
        )
    }
}

impl MappingSource for SqliteMappingSource {
    fn load(&self) -> Result<HashMap<String, String>, SwapError> {
        let sql = format!(
            "SELECT {}, {} FROM {}",
            self.swap_column, self.replacement_column, self.table
        );
        debug!(sql = %sql, "Loading identifier mapping");

        let pairs = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let pairs = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(pairs)
        })?;

        let mut mapping = HashMap::with_capacity(pairs.len());
        for (value, replacement) in pairs {
            if mapping.contains_key(&value) {
                return Err(SwapError::DuplicateValue(value));
            }
            mapping.insert(value, replacement);
        }
        Ok(mapping)
    }

    fn describe(&self) -> String {
        format!(
            "{}({} -> {})",
            self.table, self.swap_column, self.replacement_column
        )
    }
}

/// Owned, reloadable identifier mapping.
pub struct IdentifierSwapCache<S: MappingSource> {
    source: S,
    mapping: RwLock<Arc<HashMap<String, String>>>,
}

impl<S: MappingSource> IdentifierSwapCache<S> {
    /// Loads the full mapping from `source`.
    pub fn new(source: S) -> Result<Self, SwapError> {
        let mapping = Self::load_from(&source)?;
        Ok(Self {
            source,
            mapping: RwLock::new(Arc::new(mapping)),
        })
    }

    fn load_from(source: &S) -> Result<HashMap<String, String>, SwapError> {
        let started = Instant::now();
        let mapping = source.load()?;
        info!(
            source = %source.describe(),
            entries = mapping.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Identifier mapping loaded"
        );
        Ok(mapping)
    }

    /// The mapping currently being served.
    pub fn current(&self) -> Arc<HashMap<String, String>> {
        let guard = match self.mapping.read() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Identifier mapping lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        Arc::clone(&guard)
    }

    pub fn substitution_for(&self, value: &str) -> Substitution {
        match self.current().get(value) {
            Some(replacement) => Substitution::Found(replacement.clone()),
            None => Substitution::Missing {
                reason: format!("'{}' was not in the mapping table", value),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Rebuilds the mapping from the source and swaps it in. On failure the
    /// previous mapping keeps serving. Returns the new entry count.
    pub fn reload(&self) -> Result<usize, SwapError> {
        let fresh = match Self::load_from(&self.source) {
            Ok(mapping) => Arc::new(mapping),
            Err(e) => {
                warn!(error = %e, "Identifier mapping reload failed, keeping previous mapping");
                return Err(e);
            }
        };
        let entries = fresh.len();

        let mut guard = match self.mapping.write() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Identifier mapping lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = fresh;
        Ok(entries)
    }
}
