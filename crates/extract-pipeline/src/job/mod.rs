//! Job aggregate model and its ingestion state machine.
//!
//! ```text
//! WaitingForJobInfo        --(job-info)-->               WaitingForCollectionInfo | WaitingForStatuses
//! WaitingForCollectionInfo --(collections == key count)--> WaitingForStatuses
//! WaitingForStatuses       --(mark completed)-->         Archived
//! (any active state)       --(mark failed)-->            Quarantined
//! ```
//!
//! Everything here is pure. Persistence and locking live in [`crate::store`].

pub mod snapshot;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::{ExtractionRequestInfo, FileCollectionInfo, MessageHeader};
use crate::store::{JobStoreError, Result};

pub use snapshot::{ArchivedJob, JobSnapshot, KeyRejections, QuarantinedJob};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    WaitingForJobInfo,
    WaitingForCollectionInfo,
    WaitingForStatuses,
    Archived,
    Quarantined,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::WaitingForJobInfo => "WaitingForJobInfo",
            JobStatus::WaitingForCollectionInfo => "WaitingForCollectionInfo",
            JobStatus::WaitingForStatuses => "WaitingForStatuses",
            JobStatus::Archived => "Archived",
            JobStatus::Quarantined => "Quarantined",
        }
    }

    /// Active documents only ever hold one of these.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::WaitingForJobInfo
                | JobStatus::WaitingForCollectionInfo
                | JobStatus::WaitingForStatuses
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "WaitingForJobInfo" => Ok(JobStatus::WaitingForJobInfo),
            "WaitingForCollectionInfo" => Ok(JobStatus::WaitingForCollectionInfo),
            "WaitingForStatuses" => Ok(JobStatus::WaitingForStatuses),
            "Archived" => Ok(JobStatus::Archived),
            "Quarantined" => Ok(JobStatus::Quarantined),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Outcome of processing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileStatus {
    Unknown,
    Copied,
    Anonymised,
    VerifiedAnonymous,
    FlaggedIdentifiable,
    FileMissing,
    UnrecoverableError,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Unknown => "unknown",
            FileStatus::Copied => "copied",
            FileStatus::Anonymised => "anonymised",
            FileStatus::VerifiedAnonymous => "verified-anonymous",
            FileStatus::FlaggedIdentifiable => "flagged-identifiable",
            FileStatus::FileMissing => "file-missing",
            FileStatus::UnrecoverableError => "unrecoverable-error",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FileStatus::FlaggedIdentifiable | FileStatus::FileMissing | FileStatus::UnrecoverableError
        )
    }

    /// No further status is expected for a file once it has one of these.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FileStatus::Unknown | FileStatus::Anonymised)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(FileStatus::Unknown),
            "copied" => Ok(FileStatus::Copied),
            "anonymised" => Ok(FileStatus::Anonymised),
            "verified-anonymous" => Ok(FileStatus::VerifiedAnonymous),
            "flagged-identifiable" => Ok(FileStatus::FlaggedIdentifiable),
            "file-missing" => Ok(FileStatus::FileMissing),
            "unrecoverable-error" => Ok(FileStatus::UnrecoverableError),
            _ => Err(format!("Unknown file status: {}", s)),
        }
    }
}

/// Where and when a message entered the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProvenance {
    pub message_guid: Uuid,
    pub producer_identity: String,
    pub received_at: DateTime<Utc>,
}

impl MessageProvenance {
    pub fn from_header(header: &MessageHeader, received_at: DateTime<Utc>) -> Self {
        Self {
            message_guid: header.message_guid,
            producer_identity: header.producer_identity(),
            received_at,
        }
    }
}

/// Request-level fields, set once when job-info arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub provenance: MessageProvenance,
    pub project_number: String,
    pub extraction_directory: String,
    pub key_tag: String,
    pub key_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_modality: Option<String>,
}

impl JobInfo {
    fn from_message(info: &ExtractionRequestInfo, provenance: MessageProvenance) -> Self {
        Self {
            provenance,
            project_number: info.project_number.clone(),
            extraction_directory: info.extraction_directory.clone(),
            key_tag: info.key_tag.clone(),
            key_count: info.key_value_count,
            extraction_modality: info.modality().map(str::to_string),
        }
    }
}

/// The files expected for one key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFileCollection {
    pub key_value: String,
    pub provenance: MessageProvenance,
    /// Dispatch token to anonymised output path.
    pub anonymised_files: BTreeMap<Uuid, String>,
    pub rejection_reasons: BTreeMap<String, u32>,
}

impl KeyFileCollection {
    pub fn from_message(collection: &FileCollectionInfo, provenance: MessageProvenance) -> Self {
        Self {
            key_value: collection.key_value.clone(),
            provenance,
            anonymised_files: collection
                .dispatched_files
                .iter()
                .map(|f| (f.dispatch_token, f.anonymised_path.clone()))
                .collect(),
            rejection_reasons: collection.rejection_reasons.clone(),
        }
    }

    /// Same key and contents, ignoring which message delivered them.
    pub fn same_content(&self, other: &KeyFileCollection) -> bool {
        self.key_value == other.key_value
            && self.anonymised_files == other.anonymised_files
            && self.rejection_reasons == other.rejection_reasons
    }
}

/// One stored file status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatusRecord {
    pub message_guid: Uuid,
    pub anonymised_file_name: String,
    pub status: FileStatus,
    pub status_message: Option<String>,
    pub producer_identity: String,
    pub received_at: DateTime<Utc>,
}

/// Result of adding a key-file-collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOutcome {
    Added,
    /// An identical collection was already stored.
    AlreadyPresent,
}

/// The job aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub info: Option<JobInfo>,
    #[serde(default)]
    pub file_collections: Vec<KeyFileCollection>,
}

impl ExtractJob {
    /// A new job created by its job-info message.
    pub fn from_request_info(info: &ExtractionRequestInfo, provenance: MessageProvenance) -> Self {
        let mut job = Self {
            job_id: info.job_id,
            status: JobStatus::WaitingForJobInfo,
            submitted_at: info.job_submitted_at,
            info: Some(JobInfo::from_message(info, provenance)),
            file_collections: Vec::new(),
        };
        job.status = job.waiting_status();
        job
    }

    /// A stub created by a key-file-collection that beat its job-info.
    pub fn from_file_collection(
        collection: &FileCollectionInfo,
        provenance: MessageProvenance,
    ) -> Self {
        Self {
            job_id: collection.job_id,
            status: JobStatus::WaitingForJobInfo,
            submitted_at: collection.job_submitted_at,
            info: None,
            file_collections: vec![KeyFileCollection::from_message(collection, provenance)],
        }
    }

    /// Expected number of key values, once job-info is known.
    pub fn key_count(&self) -> Option<u32> {
        self.info.as_ref().map(|i| i.key_count)
    }

    pub fn is_ready(&self) -> bool {
        self.status == JobStatus::WaitingForStatuses
    }

    /// Total number of files dispatched for anonymisation.
    pub fn expected_file_count(&self) -> usize {
        self.file_collections
            .iter()
            .map(|c| c.anonymised_files.len())
            .sum()
    }

    /// Merges job-info into a stub.
    pub fn merge_request_info(
        &mut self,
        info: &ExtractionRequestInfo,
        provenance: MessageProvenance,
    ) -> Result<()> {
        if self.status != JobStatus::WaitingForJobInfo || self.info.is_some() {
            return Err(JobStoreError::illegal_state(
                self.job_id,
                format!("Received job info for a job in state {}", self.status),
            ));
        }

        if self.file_collections.len() > info.key_value_count as usize {
            return Err(JobStoreError::illegal_state(
                self.job_id,
                format!(
                    "Job already holds {} key collections but the request expects {}",
                    self.file_collections.len(),
                    info.key_value_count
                ),
            ));
        }

        self.submitted_at = info.job_submitted_at;
        self.info = Some(JobInfo::from_message(info, provenance));
        self.status = self.waiting_status();
        Ok(())
    }

    /// Adds a key-file-collection.
    pub fn add_file_collection(
        &mut self,
        collection: &FileCollectionInfo,
        provenance: MessageProvenance,
    ) -> Result<CollectionOutcome> {
        if !self.status.is_active() {
            return Err(JobStoreError::illegal_state(
                self.job_id,
                format!("Received a key collection for a job in state {}", self.status),
            ));
        }

        let incoming = KeyFileCollection::from_message(collection, provenance);
        if let Some(existing) = self
            .file_collections
            .iter()
            .find(|c| c.key_value == incoming.key_value)
        {
            if existing.same_content(&incoming) {
                return Ok(CollectionOutcome::AlreadyPresent);
            }
            return Err(JobStoreError::illegal_state(
                self.job_id,
                format!(
                    "Conflicting key collection for key value {}",
                    incoming.key_value
                ),
            ));
        }

        if let Some(expected) = self.key_count() {
            if self.file_collections.len() >= expected as usize {
                return Err(JobStoreError::illegal_state(
                    self.job_id,
                    format!(
                        "Received key collection {} beyond the expected key count of {}",
                        incoming.key_value, expected
                    ),
                ));
            }
        }

        self.file_collections.push(incoming);
        self.status = self.waiting_status();
        Ok(CollectionOutcome::Added)
    }

    /// The waiting status implied by what has arrived so far.
    fn waiting_status(&self) -> JobStatus {
        match self.key_count() {
            None => JobStatus::WaitingForJobInfo,
            Some(expected) if self.file_collections.len() == expected as usize => {
                JobStatus::WaitingForStatuses
            }
            Some(_) => JobStatus::WaitingForCollectionInfo,
        }
    }
}
