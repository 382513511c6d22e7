//! The extraction job store.
//!
//! [`ExtractJobStore`] is the contract consumed by message handlers and the
//! completion watcher; [`JobStore`] is the SQLite-backed implementation.

mod codec;
mod engine;
pub mod error;

use uuid::Uuid;

use crate::job::{ArchivedJob, JobSnapshot, QuarantinedJob};
use crate::messages::{
    ExtractMessage, ExtractedFileStatus, ExtractionRequestInfo, FileCollectionInfo, MessageHeader,
    VerificationReport,
};

pub use engine::{JobAnomaly, JobStore};
pub use error::{ErrorKind, JobStoreError, Result};

/// Operations on extraction jobs.
///
/// Ingestion failures are returned to the caller, which decides whether to
/// acknowledge, dead-letter or redeliver the message. See
/// [`JobStoreError::is_retryable`].
pub trait ExtractJobStore: Send + Sync {
    /// Records the job-info message for a job.
    fn persist_request_info(
        &self,
        info: &ExtractionRequestInfo,
        header: &MessageHeader,
    ) -> Result<()>;

    /// Records the files expected for one key value.
    fn persist_file_collection_info(
        &self,
        collection: &FileCollectionInfo,
        header: &MessageHeader,
    ) -> Result<()>;

    /// Appends a copy or anonymisation status.
    fn persist_file_status(&self, status: &ExtractedFileStatus, header: &MessageHeader)
        -> Result<()>;

    /// Appends a PII verification outcome.
    fn persist_verification(&self, report: &VerificationReport, header: &MessageHeader)
        -> Result<()>;

    /// Snapshots of every job waiting for statuses, or just `job_id`.
    fn get_ready_jobs(&self, job_id: Option<Uuid>) -> Result<Vec<JobSnapshot>>;

    /// Moves a ready job to the archive.
    fn mark_job_completed(&self, job_id: Uuid) -> Result<()>;

    /// Moves an active job to the quarantine.
    fn mark_job_failed(&self, job_id: Uuid, cause: &str) -> Result<()>;

    fn completed_job_info(&self, job_id: Uuid) -> Result<ArchivedJob>;

    fn quarantined_job(&self, job_id: Uuid) -> Result<QuarantinedJob>;

    /// Routes any inbound message to its operation.
    fn ingest(&self, message: &ExtractMessage, header: &MessageHeader) -> Result<()> {
        match message {
            ExtractMessage::RequestInfo(info) => self.persist_request_info(info, header),
            ExtractMessage::FileCollectionInfo(collection) => {
                self.persist_file_collection_info(collection, header)
            }
            ExtractMessage::FileStatus(status) => self.persist_file_status(status, header),
            ExtractMessage::Verification(report) => self.persist_verification(report, header),
        }
    }
}
