//! Read models handed to the watcher and kept as terminal history.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExtractJob, FileStatus, FileStatusRecord, JobInfo, JobStatus, KeyFileCollection};
use crate::store::{JobStoreError, Result};

/// A ready job joined with every status recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub info: JobInfo,
    pub file_collections: Vec<KeyFileCollection>,
    pub statuses: Vec<FileStatusRecord>,
}

/// Rejection counts reported for one key value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRejections<'a> {
    pub key_value: &'a str,
    pub reasons: &'a BTreeMap<String, u32>,
}

impl JobSnapshot {
    /// Builds a snapshot. Fails if the job is not ready or has no job info.
    pub fn from_parts(job: ExtractJob, statuses: Vec<FileStatusRecord>) -> Result<Self> {
        if job.status != JobStatus::WaitingForStatuses {
            return Err(JobStoreError::CorruptDocument {
                job_id: job.job_id,
                reason: format!("Expected status WaitingForStatuses, found {}", job.status),
            });
        }

        let info = job.info.ok_or_else(|| JobStoreError::CorruptDocument {
            job_id: job.job_id,
            reason: "Ready job has no job info".to_string(),
        })?;

        Ok(Self {
            job_id: job.job_id,
            submitted_at: job.submitted_at,
            info,
            file_collections: job.file_collections,
            statuses,
        })
    }

    pub fn expected_file_count(&self) -> usize {
        self.file_collections
            .iter()
            .map(|c| c.anonymised_files.len())
            .sum()
    }

    /// Keys that had at least one file rejected before dispatch.
    pub fn rejections(&self) -> Vec<KeyRejections<'_>> {
        self.file_collections
            .iter()
            .filter(|c| !c.rejection_reasons.is_empty())
            .map(|c| KeyRejections {
                key_value: &c.key_value,
                reasons: &c.rejection_reasons,
            })
            .collect()
    }

    /// Rejection counts summed over every key.
    pub fn rejection_totals(&self) -> BTreeMap<&str, u64> {
        let mut totals = BTreeMap::new();
        for collection in &self.file_collections {
            for (reason, count) in &collection.rejection_reasons {
                *totals.entry(reason.as_str()).or_insert(0) += u64::from(*count);
            }
        }
        totals
    }

    /// Files that could not be copied or anonymised.
    pub fn anonymisation_failures(&self) -> Vec<&FileStatusRecord> {
        self.statuses
            .iter()
            .filter(|s| {
                matches!(
                    s.status,
                    FileStatus::FileMissing | FileStatus::UnrecoverableError
                )
            })
            .collect()
    }

    /// Files the PII verifier flagged.
    pub fn verification_failures(&self) -> Vec<&FileStatusRecord> {
        self.statuses
            .iter()
            .filter(|s| s.status == FileStatus::FlaggedIdentifiable)
            .collect()
    }

    /// Dispatched output paths with no terminal status yet.
    pub fn outstanding_files(&self) -> Vec<&str> {
        let done: HashSet<&str> = self
            .statuses
            .iter()
            .filter(|s| s.status.is_terminal())
            .map(|s| s.anonymised_file_name.as_str())
            .collect();

        self.file_collections
            .iter()
            .flat_map(|c| c.anonymised_files.values())
            .map(String::as_str)
            .filter(|path| !done.contains(path))
            .collect()
    }

    pub fn is_fully_reported(&self) -> bool {
        self.outstanding_files().is_empty()
    }
}

/// A completed job as kept in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedJob {
    pub job: ExtractJob,
    pub archived_at: DateTime<Utc>,
}

/// A failed job as kept in the quarantine.
///
/// `raw_document` is stored verbatim; `job` is only present when it parses.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantinedJob {
    pub job_id: Uuid,
    pub raw_document: String,
    pub job: Option<ExtractJob>,
    pub cause: String,
    pub quarantined_at: DateTime<Utc>,
}
