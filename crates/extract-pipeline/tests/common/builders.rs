//! Builders for inbound messages.
//!
//! Defaults describe a valid series-level extraction with one key value, so
//! each test only spells out what it cares about.

#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use extract_pipeline::messages::{
    DispatchedFile, ExtractedFileStatus, ExtractionRequestInfo, FileCollectionInfo,
    MessageHeader, VerificationReport, STUDY_KEY_TAG,
};
use extract_pipeline::FileStatus;

/// A fresh header, as the transport would attach to a new message.
pub fn header() -> MessageHeader {
    MessageHeader::new("IntegrationTest", std::process::id())
}

/// Builder for job-info messages.
pub struct RequestInfoBuilder {
    info: ExtractionRequestInfo,
}

impl RequestInfoBuilder {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            info: ExtractionRequestInfo {
                job_id,
                job_submitted_at: Utc.with_ymd_and_hms(2026, 5, 4, 8, 30, 0).unwrap(),
                project_number: "1234-5678".to_string(),
                extraction_directory: "1234-5678/extractions/integration".to_string(),
                key_tag: "SeriesInstanceUID".to_string(),
                key_value_count: 1,
                extraction_modality: None,
            },
        }
    }

    pub fn key_count(mut self, count: u32) -> Self {
        self.info.key_value_count = count;
        self
    }

    pub fn key_tag(mut self, tag: &str) -> Self {
        self.info.key_tag = tag.to_string();
        self
    }

    /// Study-level extraction; pass `None` to leave the modality out.
    pub fn study_level(mut self, modality: Option<&str>) -> Self {
        self.info.key_tag = STUDY_KEY_TAG.to_string();
        self.info.extraction_modality = modality.map(str::to_string);
        self
    }

    pub fn modality(mut self, modality: &str) -> Self {
        self.info.extraction_modality = Some(modality.to_string());
        self
    }

    pub fn project_number(mut self, project: &str) -> Self {
        self.info.project_number = project.to_string();
        self
    }

    pub fn build(self) -> ExtractionRequestInfo {
        self.info
    }
}

/// Builder for key-file-collection messages.
pub struct CollectionBuilder {
    collection: FileCollectionInfo,
}

impl CollectionBuilder {
    pub fn new(job_id: Uuid, key_value: &str) -> Self {
        Self {
            collection: FileCollectionInfo {
                job_id,
                job_submitted_at: Utc.with_ymd_and_hms(2026, 5, 4, 8, 31, 0).unwrap(),
                key_value: key_value.to_string(),
                dispatched_files: Vec::new(),
                rejection_reasons: BTreeMap::new(),
            },
        }
    }

    /// Adds a dispatched file with a fresh dispatch token.
    pub fn file(mut self, anonymised_path: &str) -> Self {
        self.collection.dispatched_files.push(DispatchedFile {
            dispatch_token: Uuid::new_v4(),
            anonymised_path: anonymised_path.to_string(),
        });
        self
    }

    pub fn rejection(mut self, reason: &str, count: u32) -> Self {
        self.collection
            .rejection_reasons
            .insert(reason.to_string(), count);
        self
    }

    pub fn build(self) -> FileCollectionInfo {
        self.collection
    }
}

pub fn file_status(
    job_id: Uuid,
    file: &str,
    status: FileStatus,
    message: Option<&str>,
) -> ExtractedFileStatus {
    ExtractedFileStatus {
        job_id,
        anonymised_file_name: file.to_string(),
        status,
        status_message: message.map(str::to_string),
    }
}

pub fn verification(job_id: Uuid, file: &str, identifiable: bool, report: &str) -> VerificationReport {
    VerificationReport {
        job_id,
        anonymised_file_name: file.to_string(),
        is_identifiable: identifiable,
        report: report.to_string(),
    }
}
