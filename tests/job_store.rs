//! Job Store Integration Tests
//!
//! Durability across reopen, writer-lock exclusivity, and the audit trail
//! surviving a requeue.

use callscribe::domain::Stage;
use callscribe::store::{JobStore, JobStoreError};
use tempfile::TempDir;

async fn seed_recording(dir: &std::path::Path, id: &str) {
    tokio::fs::create_dir_all(dir).await.unwrap();
    tokio::fs::write(dir.join(format!("{id}.mp3")), format!("mpeg {id}"))
        .await
        .unwrap();
}

#[tokio::test]
async fn state_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let jobs_path = temp.path().join("jobs.jsonl");
    let lock_path = temp.path().join("jobs.lock");
    let recordings = temp.path().join("recordings");

    seed_recording(&recordings, "call-1").await;
    seed_recording(&recordings, "call-2").await;

    {
        let store = JobStore::open(jobs_path.clone(), lock_path.clone()).unwrap();
        store.discover_new(&recordings).await.unwrap();
        store.advance("call-1", Stage::Split).await.unwrap();
        store.advance("call-1", Stage::Transcribed).await.unwrap();
        store.record_failure("call-2", "ffmpeg timeout").await.unwrap();
    }

    // Everything above must be re-derivable from the log alone
    let store = JobStore::open(jobs_path, lock_path).unwrap();

    let call1 = store.get("call-1").await.unwrap().unwrap();
    assert_eq!(call1.stage, Stage::Transcribed);
    assert_eq!(call1.attempts, 0);

    let call2 = store.get("call-2").await.unwrap().unwrap();
    assert_eq!(call2.stage, Stage::Discovered);
    assert_eq!(call2.attempts, 1);
    assert_eq!(call2.last_error.as_deref(), Some("ffmpeg timeout"));

    let runnable = store.runnable().await.unwrap();
    assert_eq!(runnable.len(), 2);
}

#[tokio::test]
async fn writer_lock_is_exclusive() {
    let temp = TempDir::new().unwrap();
    let jobs_path = temp.path().join("jobs.jsonl");
    let lock_path = temp.path().join("jobs.lock");

    let first = JobStore::open(jobs_path.clone(), lock_path.clone()).unwrap();

    let second = JobStore::open(jobs_path.clone(), lock_path.clone());
    assert!(matches!(second, Err(JobStoreError::Locked(_))));

    // Released with the holder
    drop(first);
    assert!(JobStore::open(jobs_path, lock_path).is_ok());
}

#[tokio::test]
async fn requeue_keeps_the_audit_trail() {
    let temp = TempDir::new().unwrap();
    let recordings = temp.path().join("recordings");
    seed_recording(&recordings, "call-1").await;

    let store = JobStore::open(
        temp.path().join("jobs.jsonl"),
        temp.path().join("jobs.lock"),
    )
    .unwrap();

    store.discover_new(&recordings).await.unwrap();
    store.record_failure("call-1", "corrupt source").await.unwrap();
    store.mark_failed("call-1", "split failed after 3 attempts").await.unwrap();
    store.requeue("call-1").await.unwrap();

    let job = store.get("call-1").await.unwrap().unwrap();
    assert_eq!(job.stage, Stage::Discovered);
    assert!(job.last_error.is_none());

    // The log still carries every event that led here
    let raw = tokio::fs::read_to_string(temp.path().join("jobs.jsonl"))
        .await
        .unwrap();
    let events: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(events.len(), 4);
    assert!(raw.contains("\"stage_failed\""));
    assert!(raw.contains("\"failed\""));
    assert!(raw.contains("\"requeued\""));
}

#[tokio::test]
async fn done_jobs_are_not_runnable() {
    let temp = TempDir::new().unwrap();
    let recordings = temp.path().join("recordings");
    seed_recording(&recordings, "call-1").await;

    let store = JobStore::open(
        temp.path().join("jobs.jsonl"),
        temp.path().join("jobs.lock"),
    )
    .unwrap();

    store.discover_new(&recordings).await.unwrap();
    for stage in [Stage::Split, Stage::Transcribed, Stage::Merged, Stage::Done] {
        store.advance("call-1", stage).await.unwrap();
    }

    assert!(store.runnable().await.unwrap().is_empty());
    assert!(store.is_terminal("call-1").await.unwrap());

    // A completed job is never rediscovered
    let rediscovered = store.discover_new(&recordings).await.unwrap();
    assert!(rediscovered.is_empty());
}
