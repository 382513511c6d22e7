//! SQLite-backed job store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, debug_span, error, info, info_span, warn};
use uuid::Uuid;

use crate::db::{job_repo, status_repo, Collection, Database, DatabaseError, JobDocumentRow};
use crate::job::{
    ArchivedJob, CollectionOutcome, ExtractJob, FileStatusRecord, JobSnapshot, JobStatus,
    MessageProvenance, QuarantinedJob,
};
use crate::messages::{
    ExtractedFileStatus, ExtractionRequestInfo, FileCollectionInfo, MessageHeader,
    VerificationReport,
};
use crate::time::{Clock, SystemClock};

use super::codec;
use super::error::{JobStoreError, Result};
use super::ExtractJobStore;

// ─── Anomalies ──────────────────────────────────────────────────────────────

/// Inconsistent stored state left behind by an interrupted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAnomaly {
    /// The job is stored in more than one collection.
    MultipleCollections {
        job_id: Uuid,
        collections: Vec<Collection>,
    },
    /// An archived job still has a status namespace.
    OrphanedStatuses { job_id: Uuid },
    /// A status namespace whose job is in no collection.
    UnclaimedStatuses { job_id: Uuid },
}

impl JobAnomaly {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobAnomaly::MultipleCollections { job_id, .. } => *job_id,
            JobAnomaly::OrphanedStatuses { job_id } => *job_id,
            JobAnomaly::UnclaimedStatuses { job_id } => *job_id,
        }
    }
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Job store backed by rusqlite.
///
/// Every operation that touches job documents runs under one store-wide
/// mutex, because each is a read-modify-write spanning all three
/// collections. Status appends go straight to the job's own namespace and
/// skip the mutex.
pub struct JobStore {
    db: Database,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl JobStore {
    /// Creates a store using wall-clock time.
    pub fn new(db: Database) -> Result<Self> {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    /// Creates a store with an explicit time source.
    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> Result<Self> {
        let active = job_repo::count(&db, Collection::Active)?;
        info!(active_jobs = active, "Job store opened");
        Ok(Self {
            db,
            clock,
            lock: Mutex::new(()),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| {
            warn!("Job store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn ensure_not_terminal(&self, job_id: Uuid) -> Result<()> {
        let id = job_id.to_string();
        if job_repo::exists(&self.db, Collection::Archive, &id)? {
            return Err(JobStoreError::illegal_state(
                job_id,
                "Job has already been archived",
            ));
        }
        if job_repo::exists(&self.db, Collection::Quarantine, &id)? {
            return Err(JobStoreError::illegal_state(job_id, "Job has been quarantined"));
        }
        Ok(())
    }

    fn load_active(&self, job_id: Uuid) -> Result<Option<ExtractJob>> {
        match job_repo::find_by_id(&self.db, Collection::Active, &job_id.to_string())? {
            Some(row) => codec::decode_job(&row).map(Some),
            None => Ok(None),
        }
    }

    fn insert_active(&self, job: &ExtractJob) -> Result<()> {
        let row = codec::encode_job(job, self.clock.now())?;
        job_repo::insert(&self.db, Collection::Active, &row)?;
        Ok(())
    }

    fn replace_active(&self, job: &ExtractJob) -> Result<()> {
        let row = codec::encode_job(job, self.clock.now())?;
        if !job_repo::replace(&self.db, Collection::Active, &row)? {
            return Err(JobStoreError::NotFound {
                job_id: job.job_id,
                collection: Collection::Active,
            });
        }
        Ok(())
    }

    /// Deletes the active copy of a job already written to `destination`.
    fn remove_active(&self, job_id: Uuid, destination: Collection) -> Result<()> {
        match job_repo::delete(&self.db, Collection::Active, &job_id.to_string()) {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(%job_id, %destination, "Active copy disappeared during move");
                Ok(())
            }
            Err(e) => {
                error!(
                    %job_id,
                    %destination,
                    error = %e,
                    "Job was written to the {} but is still in the active collection",
                    destination
                );
                Err(JobStoreError::IncompleteMove {
                    job_id,
                    destination,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Writes a raw active document to the quarantine and removes it from
    /// the active collection. Caller holds the lock.
    fn quarantine_locked(&self, job_id: Uuid, raw_document: &str, cause: &str) -> Result<()> {
        let row = codec::encode_quarantined(job_id, raw_document, cause, self.clock.now());
        job_repo::insert(&self.db, Collection::Quarantine, &row).map_err(|e| match e {
            DatabaseError::DuplicateKey { .. } => JobStoreError::DuplicateQuarantine(job_id),
            other => other.into(),
        })?;
        self.remove_active(job_id, Collection::Quarantine)?;
        warn!(%job_id, cause, "Job quarantined");
        Ok(())
    }

    fn append_status(&self, job_id: Uuid, record: FileStatusRecord) -> Result<()> {
        self.ensure_not_terminal(job_id)?;
        let stored = status_repo::append(&self.db, &job_id, &codec::encode_status(&record))?;
        if stored {
            debug!(
                file = %record.anonymised_file_name,
                status = %record.status,
                "Stored file status"
            );
        } else {
            debug!(message_guid = %record.message_guid, "Ignoring redelivered status");
        }
        Ok(())
    }

    fn build_snapshot(&self, row: &JobDocumentRow) -> Result<JobSnapshot> {
        let job = codec::decode_job(row)?;
        let statuses = status_repo::scan(&self.db, &job.job_id)?
            .iter()
            .map(|s| codec::decode_status(job.job_id, s))
            .collect::<Result<Vec<_>>>()?;
        JobSnapshot::from_parts(job, statuses)
    }

    /// Lists jobs stored in more than one collection, archived jobs whose
    /// status namespace survived archival, and status namespaces that no
    /// stored job claims.
    pub fn find_anomalies(&self) -> Result<Vec<JobAnomaly>> {
        let _guard = self.guard();

        let mut locations: BTreeMap<String, Vec<Collection>> = BTreeMap::new();
        for collection in Collection::ALL {
            for id in job_repo::list_ids(&self.db, collection)? {
                locations.entry(id).or_default().push(collection);
            }
        }

        let mut anomalies = Vec::new();
        for (id, collections) in &locations {
            if collections.len() < 2 {
                continue;
            }
            match Uuid::parse_str(id) {
                Ok(job_id) => anomalies.push(JobAnomaly::MultipleCollections {
                    job_id,
                    collections: collections.clone(),
                }),
                Err(_) => warn!(id = %id, "Ignoring stored job with a malformed id"),
            }
        }

        for job_id in status_repo::list_namespaces(&self.db)? {
            match locations.get(&job_id.to_string()) {
                Some(c) if c.contains(&Collection::Archive) => {
                    anomalies.push(JobAnomaly::OrphanedStatuses { job_id });
                }
                Some(_) => {}
                None => anomalies.push(JobAnomaly::UnclaimedStatuses { job_id }),
            }
        }

        if !anomalies.is_empty() {
            warn!(count = anomalies.len(), "Found inconsistent jobs");
        }
        Ok(anomalies)
    }

    /// Finishes an interrupted move: removes the stale active copy of a job
    /// that already reached the archive or quarantine, and the status
    /// namespace of an archived job. A namespace claimed by no stored job is
    /// dropped too, so only call this for an unclaimed job once its job-info
    /// is no longer expected. Returns whether anything changed.
    pub fn resolve_anomaly(&self, job_id: Uuid) -> Result<bool> {
        let _span = info_span!("resolve_anomaly", %job_id).entered();
        let _guard = self.guard();

        let id = job_id.to_string();
        let active = job_repo::exists(&self.db, Collection::Active, &id)?;
        let archived = job_repo::exists(&self.db, Collection::Archive, &id)?;
        let quarantined = job_repo::exists(&self.db, Collection::Quarantine, &id)?;

        if archived && quarantined {
            return Err(JobStoreError::illegal_state(
                job_id,
                "Job is in both the archive and the quarantine and needs manual repair",
            ));
        }

        let mut repaired = false;
        if active && (archived || quarantined) {
            let destination = if archived {
                Collection::Archive
            } else {
                Collection::Quarantine
            };
            self.remove_active(job_id, destination)?;
            info!(%destination, "Removed stale active copy");
            repaired = true;
        }

        if archived && status_repo::drop_namespace(&self.db, &job_id)? {
            info!("Removed status namespace of archived job");
            repaired = true;
        }

        let unclaimed = !(active || archived || quarantined);
        if unclaimed && status_repo::drop_namespace(&self.db, &job_id)? {
            info!("Removed unclaimed status namespace");
            repaired = true;
        }

        Ok(repaired)
    }
}

impl ExtractJobStore for JobStore {
    fn persist_request_info(
        &self,
        info: &ExtractionRequestInfo,
        header: &MessageHeader,
    ) -> Result<()> {
        let _span = info_span!("persist_request_info", job_id = %info.job_id).entered();
        info.validate()?;

        let _guard = self.guard();
        self.ensure_not_terminal(info.job_id)?;
        let provenance = MessageProvenance::from_header(header, self.clock.now());

        match self.load_active(info.job_id)? {
            Some(mut job) => {
                job.merge_request_info(info, provenance)?;
                self.replace_active(&job)?;
                info!(status = %job.status, "Merged job info into existing job");
            }
            None => {
                let job = ExtractJob::from_request_info(info, provenance);
                self.insert_active(&job)?;
                info!(
                    status = %job.status,
                    key_count = info.key_value_count,
                    "Created job from job info"
                );
            }
        }
        Ok(())
    }

    fn persist_file_collection_info(
        &self,
        collection: &FileCollectionInfo,
        header: &MessageHeader,
    ) -> Result<()> {
        let _span = info_span!(
            "persist_file_collection_info",
            job_id = %collection.job_id,
            key = %collection.key_value
        )
        .entered();
        collection.validate()?;

        let _guard = self.guard();
        self.ensure_not_terminal(collection.job_id)?;
        let provenance = MessageProvenance::from_header(header, self.clock.now());

        match self.load_active(collection.job_id)? {
            Some(mut job) => match job.add_file_collection(collection, provenance)? {
                CollectionOutcome::Added => {
                    self.replace_active(&job)?;
                    info!(
                        status = %job.status,
                        collections = job.file_collections.len(),
                        "Added key collection"
                    );
                }
                CollectionOutcome::AlreadyPresent => {
                    debug!("Ignoring redelivered key collection");
                }
            },
            None => {
                let job = ExtractJob::from_file_collection(collection, provenance);
                self.insert_active(&job)?;
                info!("Created job stub from key collection");
            }
        }
        Ok(())
    }

    fn persist_file_status(
        &self,
        status: &ExtractedFileStatus,
        header: &MessageHeader,
    ) -> Result<()> {
        let _span = debug_span!("persist_file_status", job_id = %status.job_id).entered();
        status.validate()?;

        let record = FileStatusRecord {
            message_guid: header.message_guid,
            anonymised_file_name: status.anonymised_file_name.clone(),
            status: status.status,
            status_message: status.status_message.clone(),
            producer_identity: header.producer_identity(),
            received_at: self.clock.now(),
        };
        self.append_status(status.job_id, record)
    }

    fn persist_verification(
        &self,
        report: &VerificationReport,
        header: &MessageHeader,
    ) -> Result<()> {
        let _span = debug_span!("persist_verification", job_id = %report.job_id).entered();
        report.validate()?;

        let record = FileStatusRecord {
            message_guid: header.message_guid,
            anonymised_file_name: report.anonymised_file_name.clone(),
            status: report.status(),
            status_message: Some(report.report.clone()),
            producer_identity: header.producer_identity(),
            received_at: self.clock.now(),
        };
        self.append_status(report.job_id, record)
    }

    fn get_ready_jobs(&self, job_id: Option<Uuid>) -> Result<Vec<JobSnapshot>> {
        let _span = info_span!("get_ready_jobs", job_id = ?job_id).entered();
        let _guard = self.guard();

        let id = job_id.map(|id| id.to_string());
        let rows = job_repo::find_by_status(
            &self.db,
            Collection::Active,
            JobStatus::WaitingForStatuses.as_str(),
            id.as_deref(),
        )?;

        let mut ready = Vec::with_capacity(rows.len());
        for row in rows {
            match self.build_snapshot(&row) {
                Ok(snapshot) => ready.push(snapshot),
                Err(e) if e.is_retryable() => {
                    warn!(job_id = %row.job_id, error = %e, "Skipping job this round");
                }
                Err(e) => {
                    let Some(bad_id) = codec::decode_job_id(&row) else {
                        error!(job_id = %row.job_id, "Active job has a malformed id");
                        continue;
                    };
                    let cause = format!("Failed to reconstruct job: {}", e);
                    if let Err(qe) = self.quarantine_locked(bad_id, &row.document, &cause) {
                        error!(job_id = %bad_id, error = %qe, "Failed to quarantine job");
                    }
                }
            }
        }

        debug!(count = ready.len(), "Collected ready jobs");
        Ok(ready)
    }

    fn mark_job_completed(&self, job_id: Uuid) -> Result<()> {
        let _span = info_span!("mark_job_completed", %job_id).entered();
        let _guard = self.guard();

        let id = job_id.to_string();
        if job_repo::exists(&self.db, Collection::Archive, &id)? {
            return Err(JobStoreError::DuplicateArchive(job_id));
        }
        let row = job_repo::find_by_id(&self.db, Collection::Active, &id)?.ok_or(
            JobStoreError::NotFound {
                job_id,
                collection: Collection::Active,
            },
        )?;
        if job_repo::exists(&self.db, Collection::Quarantine, &id)? {
            return Err(JobStoreError::illegal_state(
                job_id,
                "Job is also present in the quarantine",
            ));
        }

        let mut job = codec::decode_job(&row)?;
        if !job.is_ready() {
            return Err(JobStoreError::illegal_state(
                job_id,
                format!("Cannot archive a job in state {}", job.status),
            ));
        }

        job.status = JobStatus::Archived;
        let archived = codec::encode_job(&job, self.clock.now())?;
        job_repo::insert(&self.db, Collection::Archive, &archived).map_err(|e| match e {
            DatabaseError::DuplicateKey { .. } => JobStoreError::DuplicateArchive(job_id),
            other => other.into(),
        })?;
        self.remove_active(job_id, Collection::Archive)?;

        if let Err(e) = status_repo::drop_namespace(&self.db, &job_id) {
            warn!(error = %e, "Could not remove status namespace of archived job");
        }

        info!("Job archived");
        Ok(())
    }

    fn mark_job_failed(&self, job_id: Uuid, cause: &str) -> Result<()> {
        let _span = info_span!("mark_job_failed", %job_id).entered();
        let _guard = self.guard();

        let id = job_id.to_string();
        if job_repo::exists(&self.db, Collection::Quarantine, &id)? {
            return Err(JobStoreError::DuplicateQuarantine(job_id));
        }
        let row = job_repo::find_by_id(&self.db, Collection::Active, &id)?.ok_or(
            JobStoreError::NotFound {
                job_id,
                collection: Collection::Active,
            },
        )?;
        if job_repo::exists(&self.db, Collection::Archive, &id)? {
            return Err(JobStoreError::illegal_state(
                job_id,
                "Job is also present in the archive",
            ));
        }
        if cause.trim().is_empty() {
            return Err(JobStoreError::InvalidJobMetadata(
                "A quarantine cause is required".to_string(),
            ));
        }

        self.quarantine_locked(job_id, &row.document, cause.trim())
    }

    fn completed_job_info(&self, job_id: Uuid) -> Result<ArchivedJob> {
        let row = job_repo::find_by_id(&self.db, Collection::Archive, &job_id.to_string())?
            .ok_or(JobStoreError::NotFound {
                job_id,
                collection: Collection::Archive,
            })?;
        codec::decode_archived(&row)
    }

    fn quarantined_job(&self, job_id: Uuid) -> Result<QuarantinedJob> {
        let row = job_repo::find_by_id(&self.db, Collection::Quarantine, &job_id.to_string())?
            .ok_or(JobStoreError::NotFound {
                job_id,
                collection: Collection::Quarantine,
            })?;
        codec::decode_quarantined(job_id, &row)
    }
}
