//! Inbound messages consumed by the job store.
//!
//! Every payload validates its own shape; the store applies lifecycle rules
//! on top of that.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::FileStatus;
use crate::store::{JobStoreError, Result};

/// Key tag of study-level extractions. Only these carry a modality.
pub const STUDY_KEY_TAG: &str = "StudyInstanceUID";

/// Report body sent by the verifier when it found nothing.
pub const EMPTY_VERIFICATION_REPORT: &str = "[]";

/// Transport header attached to every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Unique per message; stable across redeliveries.
    pub message_guid: Uuid,
    pub producer_executable_name: String,
    pub producer_process_id: u32,
    pub origination_time: DateTime<Utc>,
}

impl MessageHeader {
    /// Creates a header for a freshly produced message.
    pub fn new(producer_executable_name: &str, producer_process_id: u32) -> Self {
        Self {
            message_guid: Uuid::new_v4(),
            producer_executable_name: producer_executable_name.to_string(),
            producer_process_id,
            origination_time: Utc::now(),
        }
    }

    /// `executable(pid)`, as recorded on stored statuses.
    pub fn producer_identity(&self) -> String {
        format!(
            "{}({})",
            self.producer_executable_name, self.producer_process_id
        )
    }
}

/// Job-info: describes the whole extraction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequestInfo {
    pub job_id: Uuid,
    pub job_submitted_at: DateTime<Utc>,
    pub project_number: String,
    pub extraction_directory: String,
    pub key_tag: String,
    pub key_value_count: u32,
    #[serde(default)]
    pub extraction_modality: Option<String>,
}

impl ExtractionRequestInfo {
    /// The modality, treating whitespace-only as absent.
    pub fn modality(&self) -> Option<&str> {
        self.extraction_modality
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    pub fn is_study_level(&self) -> bool {
        self.key_tag == STUDY_KEY_TAG
    }

    pub fn validate(&self) -> Result<()> {
        require_job_id(&self.job_id, JobStoreError::InvalidJobMetadata)?;
        require_text(
            &self.project_number,
            "project number",
            JobStoreError::InvalidJobMetadata,
        )?;
        require_text(
            &self.extraction_directory,
            "extraction directory",
            JobStoreError::InvalidJobMetadata,
        )?;
        require_text(&self.key_tag, "key tag", JobStoreError::InvalidJobMetadata)?;

        if self.is_study_level() ^ self.modality().is_some() {
            return Err(JobStoreError::InvalidJobMetadata(format!(
                "Invalid combination of KeyTag and ExtractionModality (KeyTag={}, ExtractionModality={})",
                self.key_tag,
                self.extraction_modality.as_deref().unwrap_or("<none>")
            )));
        }

        Ok(())
    }
}

/// One file the extractor dispatched for anonymisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchedFile {
    /// Guid of the per-file extraction message.
    pub dispatch_token: Uuid,
    pub anonymised_path: String,
}

/// Key-file-collection: the files expected for one key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCollectionInfo {
    pub job_id: Uuid,
    pub job_submitted_at: DateTime<Utc>,
    pub key_value: String,
    #[serde(default)]
    pub dispatched_files: Vec<DispatchedFile>,
    #[serde(default)]
    pub rejection_reasons: BTreeMap<String, u32>,
}

impl FileCollectionInfo {
    pub fn validate(&self) -> Result<()> {
        require_job_id(&self.job_id, JobStoreError::InvalidJobMetadata)?;
        require_text(&self.key_value, "key value", JobStoreError::InvalidJobMetadata)?;

        let mut tokens = HashSet::with_capacity(self.dispatched_files.len());
        for file in &self.dispatched_files {
            if !tokens.insert(file.dispatch_token) {
                return Err(JobStoreError::InvalidJobMetadata(format!(
                    "Dispatch token {} appears more than once for key {}",
                    file.dispatch_token, self.key_value
                )));
            }
            require_text(
                &file.anonymised_path,
                "anonymised output path",
                JobStoreError::InvalidJobMetadata,
            )?;
        }

        if self.rejection_reasons.keys().any(|r| r.trim().is_empty()) {
            return Err(JobStoreError::InvalidJobMetadata(format!(
                "Blank rejection reason for key {}",
                self.key_value
            )));
        }

        Ok(())
    }
}

/// Copy/anonymisation status for one file. Successful anonymisations are
/// reported through [`VerificationReport`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFileStatus {
    pub job_id: Uuid,
    pub anonymised_file_name: String,
    pub status: FileStatus,
    #[serde(default)]
    pub status_message: Option<String>,
}

impl ExtractedFileStatus {
    pub fn validate(&self) -> Result<()> {
        require_job_id(&self.job_id, JobStoreError::InvalidStatusRecord)?;
        require_text(
            &self.anonymised_file_name,
            "anonymised file name",
            JobStoreError::InvalidStatusRecord,
        )?;

        match self.status {
            FileStatus::Unknown => {
                return Err(JobStoreError::InvalidStatusRecord(
                    "File status was unknown".to_string(),
                ))
            }
            FileStatus::Anonymised => {
                return Err(JobStoreError::InvalidStatusRecord(
                    "Received an anonymisation successful status on the failure path".to_string(),
                ))
            }
            FileStatus::VerifiedAnonymous | FileStatus::FlaggedIdentifiable => {
                return Err(JobStoreError::InvalidStatusRecord(format!(
                    "Verification outcome '{}' must arrive on the verification path",
                    self.status
                )))
            }
            _ => {}
        }

        if self.status.is_failure() && is_blank(self.status_message.as_deref()) {
            return Err(JobStoreError::InvalidStatusRecord(format!(
                "Status '{}' for {} has no status message",
                self.status, self.anonymised_file_name
            )));
        }

        Ok(())
    }
}

/// PII-verification outcome for one anonymised file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub job_id: Uuid,
    pub anonymised_file_name: String,
    pub is_identifiable: bool,
    /// Serialized failure list from the verifier; `[]` when clean.
    pub report: String,
}

impl VerificationReport {
    pub fn status(&self) -> FileStatus {
        if self.is_identifiable {
            FileStatus::FlaggedIdentifiable
        } else {
            FileStatus::VerifiedAnonymous
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_job_id(&self.job_id, JobStoreError::InvalidStatusRecord)?;
        require_text(
            &self.anonymised_file_name,
            "anonymised file name",
            JobStoreError::InvalidStatusRecord,
        )?;
        require_text(&self.report, "verification report", JobStoreError::InvalidStatusRecord)?;

        if self.is_identifiable && self.report.trim() == EMPTY_VERIFICATION_REPORT {
            return Err(JobStoreError::InvalidStatusRecord(format!(
                "No report data for {} which was marked as identifiable",
                self.anonymised_file_name
            )));
        }

        Ok(())
    }
}

/// Every message kind the store consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExtractMessage {
    RequestInfo(ExtractionRequestInfo),
    FileCollectionInfo(FileCollectionInfo),
    FileStatus(ExtractedFileStatus),
    Verification(VerificationReport),
}

impl ExtractMessage {
    pub fn job_id(&self) -> Uuid {
        match self {
            ExtractMessage::RequestInfo(m) => m.job_id,
            ExtractMessage::FileCollectionInfo(m) => m.job_id,
            ExtractMessage::FileStatus(m) => m.job_id,
            ExtractMessage::Verification(m) => m.job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExtractMessage::RequestInfo(_) => "request-info",
            ExtractMessage::FileCollectionInfo(_) => "file-collection-info",
            ExtractMessage::FileStatus(_) => "file-status",
            ExtractMessage::Verification(_) => "verification",
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn require_text(value: &str, field: &str, err: fn(String) -> JobStoreError) -> Result<()> {
    if value.trim().is_empty() {
        return Err(err(format!("The {} must not be empty", field)));
    }
    Ok(())
}

fn require_job_id(job_id: &Uuid, err: fn(String) -> JobStoreError) -> Result<()> {
    if job_id.is_nil() {
        return Err(err("The job identifier must not be nil".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_info(key_tag: &str, modality: Option<&str>) -> ExtractionRequestInfo {
        ExtractionRequestInfo {
            job_id: Uuid::new_v4(),
            job_submitted_at: Utc::now(),
            project_number: "1234-5678".to_string(),
            extraction_directory: "1234-5678/extractions/test".to_string(),
            key_tag: key_tag.to_string(),
            key_value_count: 1,
            extraction_modality: modality.map(str::to_string),
        }
    }

    fn extracted_status(status: FileStatus, message: Option<&str>) -> ExtractedFileStatus {
        ExtractedFileStatus {
            job_id: Uuid::new_v4(),
            anonymised_file_name: "series-1/anon-1.dcm".to_string(),
            status,
            status_message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_producer_identity() {
        let header = MessageHeader::new("CohortExtractor", 1234);
        assert_eq!(header.producer_identity(), "CohortExtractor(1234)");
    }

    #[test]
    fn test_series_level_without_modality_is_valid() {
        assert!(request_info("SeriesInstanceUID", None).validate().is_ok());
        assert!(request_info("SeriesInstanceUID", Some("  ")).validate().is_ok());
    }

    #[test]
    fn test_study_level_requires_modality() {
        assert!(request_info(STUDY_KEY_TAG, Some("MR")).validate().is_ok());
        assert!(matches!(
            request_info(STUDY_KEY_TAG, None).validate(),
            Err(JobStoreError::InvalidJobMetadata(_))
        ));
        assert!(matches!(
            request_info(STUDY_KEY_TAG, Some(" ")).validate(),
            Err(JobStoreError::InvalidJobMetadata(_))
        ));
    }

    #[test]
    fn test_non_study_level_rejects_modality() {
        assert!(matches!(
            request_info("SeriesInstanceUID", Some("CT")).validate(),
            Err(JobStoreError::InvalidJobMetadata(_))
        ));
    }

    #[test]
    fn test_request_info_rejects_blank_fields_and_nil_id() {
        let mut info = request_info("SeriesInstanceUID", None);
        info.project_number = " ".to_string();
        assert!(info.validate().is_err());

        let mut info = request_info("SeriesInstanceUID", None);
        info.job_id = Uuid::nil();
        assert!(matches!(
            info.validate(),
            Err(JobStoreError::InvalidJobMetadata(_))
        ));
    }

    #[test]
    fn test_collection_rejects_duplicate_tokens() {
        let token = Uuid::new_v4();
        let collection = FileCollectionInfo {
            job_id: Uuid::new_v4(),
            job_submitted_at: Utc::now(),
            key_value: "1.2.3".to_string(),
            dispatched_files: vec![
                DispatchedFile {
                    dispatch_token: token,
                    anonymised_path: "a.dcm".to_string(),
                },
                DispatchedFile {
                    dispatch_token: token,
                    anonymised_path: "b.dcm".to_string(),
                },
            ],
            rejection_reasons: BTreeMap::new(),
        };
        assert!(matches!(
            collection.validate(),
            Err(JobStoreError::InvalidJobMetadata(_))
        ));
    }

    #[test]
    fn test_collection_rejects_blank_key_and_reason() {
        let mut collection = FileCollectionInfo {
            job_id: Uuid::new_v4(),
            job_submitted_at: Utc::now(),
            key_value: "".to_string(),
            dispatched_files: vec![],
            rejection_reasons: BTreeMap::new(),
        };
        assert!(collection.validate().is_err());

        collection.key_value = "1.2.3".to_string();
        assert!(collection.validate().is_ok());

        collection.rejection_reasons.insert(" ".to_string(), 2);
        assert!(collection.validate().is_err());
    }

    #[test]
    fn test_status_path_rejects_unknown_and_success_outcomes() {
        for status in [
            FileStatus::Unknown,
            FileStatus::Anonymised,
            FileStatus::VerifiedAnonymous,
            FileStatus::FlaggedIdentifiable,
        ] {
            let report = extracted_status(status, Some("details"));
            assert!(
                matches!(report.validate(), Err(JobStoreError::InvalidStatusRecord(_))),
                "{:?} should be rejected",
                status
            );
        }
    }

    #[test]
    fn test_status_path_failure_requires_message() {
        assert!(extracted_status(FileStatus::FileMissing, None).validate().is_err());
        assert!(extracted_status(FileStatus::UnrecoverableError, Some(" "))
            .validate()
            .is_err());
        assert!(extracted_status(FileStatus::UnrecoverableError, Some("Couldn't anonymise"))
            .validate()
            .is_ok());
        assert!(extracted_status(FileStatus::Copied, None).validate().is_ok());
    }

    #[test]
    fn test_status_path_requires_file_name() {
        let mut report = extracted_status(FileStatus::Copied, None);
        report.anonymised_file_name = String::new();
        assert!(matches!(
            report.validate(),
            Err(JobStoreError::InvalidStatusRecord(_))
        ));
    }

    #[test]
    fn test_verification_rules() {
        let mut report = VerificationReport {
            job_id: Uuid::new_v4(),
            anonymised_file_name: "anon-2.dcm".to_string(),
            is_identifiable: false,
            report: "[]".to_string(),
        };
        assert!(report.validate().is_ok());
        assert_eq!(report.status(), FileStatus::VerifiedAnonymous);

        report.is_identifiable = true;
        assert!(report.validate().is_err());

        report.report = String::new();
        assert!(report.validate().is_err());

        report.report = r#"[{"Parts":[{"Word":"Smith"}]}]"#.to_string();
        assert!(report.validate().is_ok());
        assert_eq!(report.status(), FileStatus::FlaggedIdentifiable);
    }

    #[test]
    fn test_message_kind_and_job_id() {
        let info = request_info("SeriesInstanceUID", None);
        let id = info.job_id;
        let message = ExtractMessage::RequestInfo(info);
        assert_eq!(message.job_id(), id);
        assert_eq!(message.kind(), "request-info");
    }
}
