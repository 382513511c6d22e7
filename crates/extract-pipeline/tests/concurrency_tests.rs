//! Concurrent consumers sharing one store.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use uuid::Uuid;

use common::*;
use extract_pipeline::db::Collection;
use extract_pipeline::{ExtractJobStore, FileStatus, JobStoreError};

const THREADS: usize = 8;

#[test]
fn test_concurrent_collections_lose_no_updates() {
    let harness = TestHarness::new();
    let job_id = Uuid::new_v4();
    harness
        .store
        .persist_request_info(
            &RequestInfoBuilder::new(job_id).key_count(THREADS as u32).build(),
            &header(),
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&harness.store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let collection = CollectionBuilder::new(job_id, &format!("1.2.{}", i))
                    .file(&format!("key-{}/anon.dcm", i))
                    .build();
                barrier.wait();
                store.persist_file_collection_info(&collection, &header())
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let ready = harness.store.get_ready_jobs(Some(job_id)).unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].file_collections.len(), THREADS);
    assert_eq!(ready[0].expected_file_count(), THREADS);
}

#[test]
fn test_concurrent_completion_archives_once() {
    let harness = TestHarness::new();
    let job_id = harness.ready_job(&["a.dcm"]);

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&harness.store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.mark_job_completed(job_id)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(JobStoreError::DuplicateArchive(_))))
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(duplicates, THREADS - 1);
    assert!(!harness.is_in(Collection::Active, job_id));
    assert_eq!(harness.count(Collection::Archive), 1);
}

#[test]
fn test_completion_races_with_failure() {
    let harness = TestHarness::new();
    let job_id = harness.ready_job(&["a.dcm"]);

    let barrier = Arc::new(Barrier::new(2));
    let complete = {
        let store = Arc::clone(&harness.store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            store.mark_job_completed(job_id)
        })
    };
    let fail = {
        let store = Arc::clone(&harness.store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            store.mark_job_failed(job_id, "watcher timed out")
        })
    };

    let completed = complete.join().unwrap();
    let failed = fail.join().unwrap();
    assert!(completed.is_ok() ^ failed.is_ok());

    let archived = harness.is_in(Collection::Archive, job_id);
    let quarantined = harness.is_in(Collection::Quarantine, job_id);
    assert!(archived ^ quarantined);
    assert!(!harness.is_in(Collection::Active, job_id));
    assert!(harness.store.find_anomalies().unwrap().is_empty());
}

#[test]
fn test_status_ingestion_alongside_polling() {
    let harness = TestHarness::new();
    let files: Vec<String> = (0..40).map(|i| format!("anon-{}.dcm", i)).collect();
    let file_refs: Vec<&str> = files.iter().map(String::as_str).collect();
    let job_id = harness.ready_job(&file_refs);

    let writers: Vec<_> = files
        .chunks(10)
        .map(|chunk| {
            let store = Arc::clone(&harness.store);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for file in chunk {
                    store
                        .persist_file_status(
                            &file_status(job_id, &file, FileStatus::Copied, None),
                            &header(),
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    let poller = {
        let store = Arc::clone(&harness.store);
        thread::spawn(move || {
            for _ in 0..20 {
                let ready = store.get_ready_jobs(Some(job_id)).unwrap();
                assert_eq!(ready.len(), 1);
                assert!(ready[0].statuses.len() <= 40);
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    poller.join().unwrap();

    let snapshot = harness.store.get_ready_jobs(Some(job_id)).unwrap().remove(0);
    assert_eq!(snapshot.statuses.len(), 40);
    assert!(snapshot.is_fully_reported());
}
