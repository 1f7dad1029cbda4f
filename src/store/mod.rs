//! JSONL-based job store for idempotent call processing.
//!
//! Follows an append-only log pattern: each state change is appended as a
//! JSON line and current state is derived by replay. Every mutation is
//! flushed to disk before the caller proceeds, so after a crash the stored
//! stage alone determines what happens next. An exclusive lock file keeps a
//! second pipeline process from interleaving writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{CallJob, Stage};

/// Errors that can occur with the job store
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Call not found: {0}")]
    NotFound(String),

    #[error("Invalid stage transition: {from} → {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Job store is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("Job store opened read-only; mutation refused")]
    ReadOnly,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An event in the job log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub call_id: String,

    #[serde(flatten)]
    pub kind: JobEventKind,
}

impl JobEvent {
    fn new(call_id: &str, kind: JobEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            call_id: call_id.to_string(),
            kind,
        }
    }
}

/// Types of job events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum JobEventKind {
    /// Source recording seen for the first time
    Discovered {
        source_path: PathBuf,
        source_hash: String,
    },

    /// A stage completed; `stage` is the milestone reached
    Advanced { stage: Stage },

    /// A stage attempt failed; the job stays in its current stage
    StageFailed { stage: Stage, error: String },

    /// Retry budget exhausted; terminal
    Failed { error: String },

    /// Manual failed → discovered reset
    Requeued,
}

/// Append-only job store with an exclusive writer lock.
pub struct JobStore {
    events_path: PathBuf,

    /// Held for the store's lifetime; None for read-only stores
    lock: Option<std::fs::File>,
}

impl JobStore {
    /// Open the store for mutation, taking the exclusive writer lock.
    pub fn open(events_path: PathBuf, lock_path: PathBuf) -> Result<Self, JobStoreError> {
        if let Some(parent) = events_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| JobStoreError::Locked(lock_path))?;

        Ok(Self {
            events_path,
            lock: Some(lock_file),
        })
    }

    /// Open without the writer lock, for inspection commands.
    pub fn open_read_only(events_path: PathBuf) -> Self {
        Self {
            events_path,
            lock: None,
        }
    }

    /// Append an event to the log, flushed before returning
    async fn append(&self, event: &JobEvent) -> Result<(), JobStoreError> {
        if self.lock.is_none() {
            return Err(JobStoreError::ReadOnly);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events to build current state
    pub async fn replay(&self) -> Result<HashMap<String, CallJob>, JobStoreError> {
        let mut jobs: HashMap<String, CallJob> = HashMap::new();

        if !self.events_path.exists() {
            return Ok(jobs);
        }

        let file = File::open(&self.events_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let event: JobEvent = serde_json::from_str(&line)?;
            Self::apply_event(&mut jobs, event);
        }

        Ok(jobs)
    }

    /// Apply a single event to the state
    fn apply_event(jobs: &mut HashMap<String, CallJob>, event: JobEvent) {
        match event.kind {
            JobEventKind::Discovered {
                source_path,
                source_hash,
            } => {
                jobs.entry(event.call_id.clone()).or_insert(CallJob {
                    id: event.call_id,
                    source_path,
                    source_hash,
                    stage: Stage::Discovered,
                    attempts: 0,
                    last_error: None,
                    discovered_at: event.timestamp,
                    updated_at: event.timestamp,
                });
            }
            JobEventKind::Advanced { stage } => {
                if let Some(job) = jobs.get_mut(&event.call_id) {
                    job.stage = stage;
                    job.attempts = 0;
                    job.updated_at = event.timestamp;
                }
            }
            JobEventKind::StageFailed { error, .. } => {
                if let Some(job) = jobs.get_mut(&event.call_id) {
                    job.attempts += 1;
                    job.last_error = Some(error);
                    job.updated_at = event.timestamp;
                }
            }
            JobEventKind::Failed { error } => {
                if let Some(job) = jobs.get_mut(&event.call_id) {
                    job.stage = Stage::Failed;
                    job.last_error = Some(error);
                    job.updated_at = event.timestamp;
                }
            }
            JobEventKind::Requeued => {
                if let Some(job) = jobs.get_mut(&event.call_id) {
                    job.stage = Stage::Discovered;
                    job.attempts = 0;
                    job.last_error = None;
                    job.updated_at = event.timestamp;
                }
            }
        }
    }

    /// Scan the recordings directory for sources without a job record.
    ///
    /// Side-effect-free on already-known sources; safe to re-run any time.
    /// Returns the newly created jobs in filename order.
    pub async fn discover_new(
        &self,
        recordings_dir: &Path,
    ) -> Result<Vec<CallJob>, JobStoreError> {
        let known = self.replay().await?;
        let mut created = Vec::new();

        let pattern = recordings_dir.join("*.mp3");
        let sources: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(|p| p.ok()).collect())
            .unwrap_or_default();

        for source in sources {
            let Some(id) = source.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if known.contains_key(id) {
                continue;
            }

            let source_hash = file_sha256(&source).await?;
            let event = JobEvent::new(
                id,
                JobEventKind::Discovered {
                    source_path: source.clone(),
                    source_hash: source_hash.clone(),
                },
            );
            self.append(&event).await?;

            created.push(CallJob {
                id: id.to_string(),
                source_path: source,
                source_hash,
                stage: Stage::Discovered,
                attempts: 0,
                last_error: None,
                discovered_at: event.timestamp,
                updated_at: event.timestamp,
            });
        }

        Ok(created)
    }

    /// Get a specific job by call id
    pub async fn get(&self, id: &str) -> Result<Option<CallJob>, JobStoreError> {
        let jobs = self.replay().await?;
        Ok(jobs.get(id).cloned())
    }

    /// All non-terminal jobs in discovery order (FIFO)
    pub async fn runnable(&self) -> Result<Vec<CallJob>, JobStoreError> {
        let jobs = self.replay().await?;
        let mut pending: Vec<CallJob> = jobs
            .into_values()
            .filter(|job| !job.is_terminal())
            .collect();

        pending.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(pending)
    }

    /// Advance a job to the next stage. Only the immediate successor of the
    /// stored stage is accepted; anything else is an invalid transition.
    pub async fn advance(&self, id: &str, new_stage: Stage) -> Result<(), JobStoreError> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        if job.stage.next() != Some(new_stage) {
            return Err(JobStoreError::InvalidTransition {
                from: job.stage,
                to: new_stage,
            });
        }

        self.append(&JobEvent::new(id, JobEventKind::Advanced { stage: new_stage }))
            .await
    }

    /// Record a failed attempt of the job's current stage
    pub async fn record_failure(&self, id: &str, error: &str) -> Result<(), JobStoreError> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        self.append(&JobEvent::new(
            id,
            JobEventKind::StageFailed {
                stage: job.stage,
                error: error.to_string(),
            },
        ))
        .await
    }

    /// Move a job to the terminal failed state
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<(), JobStoreError> {
        self.append(&JobEvent::new(
            id,
            JobEventKind::Failed {
                error: error.to_string(),
            },
        ))
        .await
    }

    /// Reset a failed job back to discovered for another run
    pub async fn requeue(&self, id: &str) -> Result<(), JobStoreError> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;

        if job.stage != Stage::Failed {
            return Err(JobStoreError::InvalidTransition {
                from: job.stage,
                to: Stage::Discovered,
            });
        }

        self.append(&JobEvent::new(id, JobEventKind::Requeued)).await
    }

    pub async fn is_terminal(&self, id: &str) -> Result<bool, JobStoreError> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(id.to_string()))?;
        Ok(job.is_terminal())
    }

    /// Get store status summary
    pub async fn summary(&self) -> Result<StoreSummary, JobStoreError> {
        let jobs = self.replay().await?;

        let mut summary = StoreSummary::default();
        for job in jobs.values() {
            match job.stage {
                Stage::Done => summary.done += 1,
                Stage::Failed => summary.failed += 1,
                _ => summary.in_flight += 1,
            }
        }

        let mut all: Vec<&CallJob> = jobs.values().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summary.recent = all.into_iter().take(5).cloned().collect();

        Ok(summary)
    }
}

/// Store status summary
#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub in_flight: usize,
    pub done: usize,
    pub failed: usize,
    pub recent: Vec<CallJob>,
}

impl StoreSummary {
    pub fn total(&self) -> usize {
        self.in_flight + self.done + self.failed
    }
}

/// SHA256 of file content, first 12 hex chars
pub async fn file_sha256(path: &Path) -> Result<String, std::io::Error> {
    let content = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    let digest = hasher.finalize();

    Ok(hex::encode(&digest[..6]))
}
