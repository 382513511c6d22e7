//! Test harness for isolated job store execution.
//!
//! Every `TestHarness` owns a temporary directory holding its own SQLite
//! database, opened through the same configuration path production uses.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use extract_pipeline::config::{Config, DatabaseConfig, LoggingConfig};
use extract_pipeline::db::{job_repo, Collection, Database};
use extract_pipeline::{open_job_store, ExtractJobStore, JobStore};

use super::builders::{header, CollectionBuilder, RequestInfoBuilder};

pub struct TestHarness {
    /// Kept alive for the lifetime of the harness.
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub config: Config,
    pub store: Arc<JobStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("jobs.db");
        let config = Config {
            version: "1.0".to_string(),
            database: DatabaseConfig {
                path: Some(db_path.clone()),
                busy_timeout_ms: 2_000,
            },
            logging: LoggingConfig::default(),
            identifier_mapping: None,
        };
        let store = Arc::new(open_job_store(&config).expect("Failed to open job store"));

        Self {
            temp_dir,
            db_path,
            config,
            store,
        }
    }

    pub fn db(&self) -> &Database {
        self.store.database()
    }

    /// A second store on the same database file, as after a restart.
    pub fn reopen(&self) -> JobStore {
        open_job_store(&self.config).expect("Failed to reopen job store")
    }

    pub fn is_in(&self, collection: Collection, job_id: Uuid) -> bool {
        job_repo::exists(self.db(), collection, &job_id.to_string()).expect("exists query failed")
    }

    pub fn count(&self, collection: Collection) -> u64 {
        job_repo::count(self.db(), collection).expect("count query failed")
    }

    /// Creates a job with one key value that is waiting for statuses.
    pub fn ready_job(&self, files: &[&str]) -> Uuid {
        let job_id = Uuid::new_v4();
        self.store
            .persist_request_info(&RequestInfoBuilder::new(job_id).build(), &header())
            .expect("job info rejected");

        let mut collection = CollectionBuilder::new(job_id, "1.2.840.1");
        for file in files {
            collection = collection.file(file);
        }
        self.store
            .persist_file_collection_info(&collection.build(), &header())
            .expect("key collection rejected");
        job_id
    }

    /// Overwrites the stored document of an active job.
    pub fn corrupt_active_document(&self, job_id: Uuid, document: &str) {
        self.db()
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE extract_jobs SET document = ?1 WHERE job_id = ?2",
                    rusqlite::params![document, job_id.to_string()],
                )?;
                Ok(())
            })
            .expect("Failed to corrupt document");
    }
}
