//! Job store error types.

use thiserror::Error;
use uuid::Uuid;

use crate::db::{Collection, DatabaseError};

/// Errors returned by [`ExtractJobStore`](super::ExtractJobStore) operations.
#[derive(Error, Debug)]
pub enum JobStoreError {
    /// Malformed or contradictory job fields. The message should be rejected.
    #[error("Invalid job metadata: {0}")]
    InvalidJobMetadata(String),

    /// The message does not fit the job's lifecycle stage.
    #[error("Illegal state for job {job_id}: {reason}")]
    IllegalJobState { job_id: Uuid, reason: String },

    /// Malformed status payload.
    #[error("Invalid status record: {0}")]
    InvalidStatusRecord(String),

    /// Lifecycle or history lookup for a job that is not there.
    #[error("Job {job_id} not found in the {collection} collection")]
    NotFound { job_id: Uuid, collection: Collection },

    #[error("Job {0} is already present in the archive")]
    DuplicateArchive(Uuid),

    #[error("Job {0} is already present in the quarantine")]
    DuplicateQuarantine(Uuid),

    /// The job reached `destination` but its active copy was not removed.
    #[error("Job {job_id} was written to the {destination} but is still active: {reason}")]
    IncompleteMove {
        job_id: Uuid,
        destination: Collection,
        reason: String,
    },

    /// A stored document could not be interpreted.
    #[error("Stored data for job {job_id} is corrupt: {reason}")]
    CorruptDocument { job_id: Uuid, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Coarse classification so consumers can choose between rejecting a
/// message and retrying it at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The message itself is bad.
    Validation,
    /// The message arrived at the wrong point in the job's lifecycle.
    State,
    NotFound,
    /// A terminal transition was attempted twice.
    Conflict,
    /// Stored data is inconsistent or corrupt and needs an operator.
    Inconsistency,
    /// The store could not be reached or failed mid-operation.
    Infrastructure,
}

impl JobStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobStoreError::InvalidJobMetadata(_) | JobStoreError::InvalidStatusRecord(_) => {
                ErrorKind::Validation
            }
            JobStoreError::IllegalJobState { .. } => ErrorKind::State,
            JobStoreError::NotFound { .. } => ErrorKind::NotFound,
            JobStoreError::DuplicateArchive(_) | JobStoreError::DuplicateQuarantine(_) => {
                ErrorKind::Conflict
            }
            JobStoreError::IncompleteMove { .. } | JobStoreError::CorruptDocument { .. } => {
                ErrorKind::Inconsistency
            }
            JobStoreError::Database(_) => ErrorKind::Infrastructure,
        }
    }

    /// True only for failures where redelivering the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }

    pub(crate) fn illegal_state(job_id: Uuid, reason: impl Into<String>) -> Self {
        JobStoreError::IllegalJobState {
            job_id,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, JobStoreError>;
