//! Conversions between the aggregate model and stored rows.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{JobDocumentRow, StatusRow};
use crate::job::{ArchivedJob, ExtractJob, FileStatusRecord, JobStatus, QuarantinedJob};
use crate::time::{format_timestamp, parse_timestamp};

use super::error::{JobStoreError, Result};

fn corrupt(job_id: Uuid, reason: impl Into<String>) -> JobStoreError {
    JobStoreError::CorruptDocument {
        job_id,
        reason: reason.into(),
    }
}

/// Encodes a job for the active or archive collection.
pub(crate) fn encode_job(job: &ExtractJob, recorded_at: DateTime<Utc>) -> Result<JobDocumentRow> {
    let document = serde_json::to_string(job)
        .map_err(|e| corrupt(job.job_id, format!("Failed to serialize job: {}", e)))?;
    Ok(JobDocumentRow {
        job_id: job.job_id.to_string(),
        status: job.status.as_str().to_string(),
        document,
        recorded_at: format_timestamp(recorded_at),
        cause: None,
    })
}

/// Parses the job id of a stored row.
pub(crate) fn decode_job_id(row: &JobDocumentRow) -> Option<Uuid> {
    Uuid::parse_str(&row.job_id).ok()
}

/// Decodes a job document, checking it against its row.
pub(crate) fn decode_job(row: &JobDocumentRow) -> Result<ExtractJob> {
    let job_id = decode_job_id(row).unwrap_or_else(Uuid::nil);
    let job: ExtractJob = serde_json::from_str(&row.document)
        .map_err(|e| corrupt(job_id, format!("Unparsable job document: {}", e)))?;

    if job.job_id != job_id {
        return Err(corrupt(
            job_id,
            format!("Document belongs to job {}", job.job_id),
        ));
    }
    if job.status.as_str() != row.status {
        return Err(corrupt(
            job_id,
            format!(
                "Indexed status {} does not match document status {}",
                row.status, job.status
            ),
        ));
    }
    Ok(job)
}

pub(crate) fn decode_archived(row: &JobDocumentRow) -> Result<ArchivedJob> {
    let job = decode_job(row)?;
    let archived_at = parse_timestamp(&row.recorded_at)
        .map_err(|e| corrupt(job.job_id, format!("Bad archival timestamp: {}", e)))?;
    Ok(ArchivedJob { job, archived_at })
}

/// Builds the quarantine row. A parsable document is stored with its status
/// set to `Quarantined`; anything else is kept verbatim.
pub(crate) fn encode_quarantined(
    job_id: Uuid,
    raw_document: &str,
    cause: &str,
    quarantined_at: DateTime<Utc>,
) -> JobDocumentRow {
    let document = serde_json::from_str::<ExtractJob>(raw_document)
        .ok()
        .and_then(|mut job| {
            job.status = JobStatus::Quarantined;
            serde_json::to_string(&job).ok()
        })
        .unwrap_or_else(|| raw_document.to_string());

    JobDocumentRow {
        job_id: job_id.to_string(),
        status: JobStatus::Quarantined.as_str().to_string(),
        document,
        recorded_at: format_timestamp(quarantined_at),
        cause: Some(cause.to_string()),
    }
}

pub(crate) fn decode_quarantined(job_id: Uuid, row: &JobDocumentRow) -> Result<QuarantinedJob> {
    let quarantined_at = parse_timestamp(&row.recorded_at)
        .map_err(|e| corrupt(job_id, format!("Bad quarantine timestamp: {}", e)))?;
    Ok(QuarantinedJob {
        job_id,
        raw_document: row.document.clone(),
        job: serde_json::from_str(&row.document).ok(),
        cause: row.cause.clone().unwrap_or_default(),
        quarantined_at,
    })
}

pub(crate) fn encode_status(record: &FileStatusRecord) -> StatusRow {
    StatusRow {
        message_guid: record.message_guid.to_string(),
        anonymised_file_name: record.anonymised_file_name.clone(),
        status: record.status.as_str().to_string(),
        status_message: record.status_message.clone(),
        producer_identity: record.producer_identity.clone(),
        received_at: format_timestamp(record.received_at),
    }
}

pub(crate) fn decode_status(job_id: Uuid, row: &StatusRow) -> Result<FileStatusRecord> {
    let message_guid = Uuid::parse_str(&row.message_guid)
        .map_err(|e| corrupt(job_id, format!("Bad status message guid: {}", e)))?;
    let status = row
        .status
        .parse()
        .map_err(|e: String| corrupt(job_id, e))?;
    let received_at = parse_timestamp(&row.received_at)
        .map_err(|e| corrupt(job_id, format!("Bad status timestamp: {}", e)))?;

    Ok(FileStatusRecord {
        message_guid,
        anonymised_file_name: row.anonymised_file_name.clone(),
        status,
        status_message: row.status_message.clone(),
        producer_identity: row.producer_identity.clone(),
        received_at,
    })
}
