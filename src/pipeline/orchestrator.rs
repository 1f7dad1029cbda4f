//! Main orchestrator for call processing.
//!
//! Advances every discovered call through split → transcribe → merge,
//! enforcing per-stage retry budgets, bounded concurrency, and the single
//! accelerator slot. The job store's recorded stage is the only state the
//! orchestrator trusts; in-memory queues are disposable and a restart picks
//! up exactly where the log says each call stands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::domain::{CallJob, Leg, Stage};
use crate::fuse;
use crate::persist;
use crate::split::ChannelSplitter;
use crate::store::JobStore;
use crate::transcribe::{load_transcript, TranscriptionWorker};

use super::retry::RetryPolicy;

/// Paths and limits the orchestrator runs under.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub recordings_dir: PathBuf,
    pub whisper_dir: PathBuf,

    /// Concurrent ffmpeg splits across calls
    pub split_workers: usize,

    /// Concurrent transcriptions on CPU-only configurations; an accelerator
    /// always gets exactly one slot
    pub transcribe_workers: usize,

    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            recordings_dir: config.recordings_dir(),
            whisper_dir: config.whisper_dir(),
            split_workers: config.split_workers,
            transcribe_workers: config.transcribe_workers,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one discovery-and-process pass
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub admitted: usize,
    pub completed: usize,
    pub failed: usize,

    /// Calls left mid-pipeline by a shutdown; resumable from the store
    pub interrupted: usize,
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    store: JobStore,
    splitter: Arc<dyn ChannelSplitter>,
    worker: TranscriptionWorker,
    settings: PipelineSettings,

    split_gate: Arc<Semaphore>,

    /// One slot while an accelerator is in play; ready calls queue FIFO
    asr_gate: Arc<Semaphore>,

    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        store: JobStore,
        splitter: Arc<dyn ChannelSplitter>,
        worker: TranscriptionWorker,
        settings: PipelineSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let transcribe_slots = if worker.device().is_accelerator() {
            1
        } else {
            settings.transcribe_workers.max(1)
        };

        Arc::new(Self {
            split_gate: Arc::new(Semaphore::new(settings.split_workers.max(1))),
            asr_gate: Arc::new(Semaphore::new(transcribe_slots)),
            store,
            splitter,
            worker,
            settings,
            shutdown,
        })
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One full pass: discover new recordings, then drive every
    /// non-terminal call as far as it will go.
    #[instrument(skip(self))]
    pub async fn run_once(self: &Arc<Self>) -> Result<RunSummary> {
        let discovered = self
            .store
            .discover_new(&self.settings.recordings_dir)
            .await
            .context("Discovery scan failed")?;
        if !discovered.is_empty() {
            info!(count = discovered.len(), "Discovered new recordings");
        }

        let jobs = self.store.runnable().await?;

        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();

        for job in jobs {
            if self.is_shutting_down() {
                info!("Shutdown requested, not admitting further calls");
                break;
            }
            summary.admitted += 1;

            let this = Arc::clone(self);
            tasks.spawn(async move { this.process_call(job).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Stage::Done)) => summary.completed += 1,
                Ok(Ok(Stage::Failed)) => summary.failed += 1,
                Ok(Ok(_)) => summary.interrupted += 1,
                Ok(Err(e)) => {
                    // Store-level trouble; the call stays resumable
                    error!(error = %e, "Call task aborted");
                    summary.interrupted += 1;
                }
                Err(e) => {
                    error!(error = %e, "Call task panicked");
                    summary.interrupted += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Drive one call from its stored stage to a terminal state, or stop
    /// cleanly between stages when shutdown is requested.
    #[instrument(skip(self, job), fields(call = %job.id))]
    async fn process_call(self: Arc<Self>, mut job: CallJob) -> Result<Stage> {
        while !job.stage.is_terminal() {
            if self.is_shutting_down() {
                info!(stage = %job.stage, "Leaving call for the next run");
                return Ok(job.stage);
            }

            match self.execute_stage(&job).await {
                Ok(next) => {
                    self.store.advance(&job.id, next).await?;
                    job.stage = next;
                    job.attempts = 0;
                }
                Err(e) => {
                    self.store.record_failure(&job.id, &e.to_string()).await?;
                    job.attempts += 1;

                    if self.settings.retry.should_retry(job.attempts) {
                        let delay = self.settings.retry.delay_for_attempt(job.attempts);
                        warn!(
                            work = job.stage.work_label(),
                            attempt = job.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Stage failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        let reason = format!(
                            "{} failed after {} attempts: {}",
                            job.stage.work_label(),
                            job.attempts,
                            e
                        );
                        self.store.mark_failed(&job.id, &reason).await?;
                        error!(work = job.stage.work_label(), error = %e, "Call failed permanently");
                        return Ok(Stage::Failed);
                    }
                }
            }
        }

        Ok(job.stage)
    }

    /// Do the work the stored stage calls for and name the stage reached
    async fn execute_stage(&self, job: &CallJob) -> Result<Stage> {
        let call_dir = self.settings.whisper_dir.join(&job.id);

        match job.stage {
            Stage::Discovered => {
                self.split_call(job, &call_dir).await?;
                Ok(Stage::Split)
            }
            Stage::Split => {
                self.transcribe_call(&call_dir).await?;
                Ok(Stage::Transcribed)
            }
            Stage::Transcribed => {
                self.merge_call(job, &call_dir).await?;
                Ok(Stage::Merged)
            }
            // Transcript persisted; nothing left but the final advance
            Stage::Merged => Ok(Stage::Done),
            Stage::Done | Stage::Failed => {
                anyhow::bail!("terminal stage {} has no work", job.stage)
            }
        }
    }

    async fn split_call(&self, job: &CallJob, call_dir: &Path) -> Result<()> {
        let _permit = self
            .split_gate
            .acquire()
            .await
            .context("Split gate closed")?;

        for leg in Leg::ALL {
            self.splitter
                .split(&job.source_path, leg, &call_dir.join(leg.wav_name()))
                .await?;
        }

        Ok(())
    }

    async fn transcribe_call(&self, call_dir: &Path) -> Result<()> {
        // Held across both legs so the device changes hands once per call
        let _permit = self
            .asr_gate
            .acquire()
            .await
            .context("Transcription gate closed")?;

        for leg in Leg::ALL {
            self.worker.transcribe_leg(call_dir, leg).await?;
        }

        Ok(())
    }

    async fn merge_call(&self, job: &CallJob, call_dir: &Path) -> Result<()> {
        let customer = load_transcript(call_dir, Leg::Customer).await?;
        let store_leg = load_transcript(call_dir, Leg::Store).await?;

        let recorded_at = source_recorded_at(&job.source_path).await?;
        let merged = fuse::fuse(&job.id, recorded_at, &customer, &store_leg)?;

        persist::write_transcript(call_dir, &merged).await?;

        Ok(())
    }
}

/// When the call happened: the source recording's mtime. Stable across
/// re-runs, which keeps the persisted transcript byte-identical.
async fn source_recorded_at(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Source recording vanished: {}", path.display()))?;
    let mtime = metadata
        .modified()
        .context("Filesystem does not report mtimes")?;

    Ok(DateTime::<Utc>::from(mtime))
}
