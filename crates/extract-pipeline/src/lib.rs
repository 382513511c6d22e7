pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod logging;
pub mod messages;
pub mod store;
pub mod swap;
pub mod time;

pub use config::{load_config, Config, ConfigFormat};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ExtractPipelineError, Result};
pub use job::{ExtractJob, FileStatus, JobSnapshot, JobStatus};
pub use logging::{init_logging, LoggingError};
pub use messages::{ExtractMessage, MessageHeader};
pub use store::{ErrorKind, ExtractJobStore, JobAnomaly, JobStore, JobStoreError};
pub use swap::{IdentifierSwapCache, SqliteMappingSource, Substitution, SwapError};
pub use time::{Clock, FixedClock, SystemClock};

/// Opens the configured database and builds a job store on it.
pub fn open_job_store(config: &Config) -> Result<JobStore> {
    let db = config.database.open()?;
    Ok(JobStore::new(db)?)
}

/// Builds the identifier swap cache when the config names a mapping table.
pub fn open_swap_cache(
    config: &Config,
    db: &Database,
) -> Result<Option<IdentifierSwapCache<SqliteMappingSource>>> {
    let Some(mapping) = &config.identifier_mapping else {
        return Ok(None);
    };
    let source = SqliteMappingSource::from_config(db.clone(), mapping)?;
    Ok(Some(IdentifierSwapCache::new(source)?))
}
