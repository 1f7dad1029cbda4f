//! Command-line interface for callscribe.
//!
//! Provides commands for running the pipeline once, watching for new
//! recordings, inspecting job state, requeueing failed calls, and serving
//! call audio to the dashboard.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use crate::config::{config, Config};
use crate::pipeline::{watch_loop, Orchestrator, PipelineSettings};
use crate::split::FfmpegSplitter;
use crate::store::JobStore;
use crate::sync::{RecordingSource, RsyncMirror};
use crate::transcribe::{TranscriptionWorker, WhisperCli};

/// callscribe - two-leg call transcription pipeline
#[derive(Parser, Debug)]
#[command(name = "callscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process all pending recordings once and exit
    Run {
        /// Pull recordings from the configured remote first
        #[arg(long)]
        sync: bool,
    },

    /// Watch the recordings directory and process continuously
    Watch {
        /// Seconds between rescans when the watcher stays quiet
        #[arg(long, default_value = "300")]
        poll_interval: u64,
    },

    /// Show job store status
    Status,

    /// Requeue a failed call for another run
    Retry {
        /// Call ID (recording file stem)
        call_id: String,
    },

    /// Serve call audio over HTTP
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        address: String,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = config()?;

        match self.command {
            Commands::Run { sync } => run_pipeline(config, sync).await,
            Commands::Watch { poll_interval } => {
                watch_pipeline(config, Duration::from_secs(poll_interval)).await
            }
            Commands::Status => show_status(config).await,
            Commands::Retry { call_id } => retry_call(config, &call_id).await,
            Commands::Serve { address } => {
                crate::serve::serve(&address, config.data_dir.clone()).await
            }
        }
    }
}

/// Build the orchestrator over the real ffmpeg/whisper tools.
fn build_orchestrator(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<Arc<Orchestrator>> {
    let store = JobStore::open(config.jobs_path(), config.jobs_lock_path())
        .context("Another callscribe process owns the job store")?;

    let splitter = Arc::new(FfmpegSplitter::new(config.sample_rate));
    let engine = Arc::new(WhisperCli::new(
        config.whisper_bin.clone(),
        config.language.clone(),
    ));
    let worker = TranscriptionWorker::new(engine, config.model.clone(), config.device);

    info!(
        model = %config.model,
        device = worker.device().as_str(),
        "Pipeline ready"
    );

    Ok(Orchestrator::new(
        store,
        splitter,
        worker,
        PipelineSettings::from_config(config),
        shutdown,
    ))
}

/// Flip the shutdown flag on ctrl-c; in-flight stage work finishes first.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, letting in-flight work finish");
            let _ = tx.send(true);
        }
    });

    rx
}

async fn run_pipeline(config: &Config, sync: bool) -> Result<()> {
    if sync {
        let remote = config
            .remote
            .clone()
            .context("No remote configured (CALLSCRIBE_REMOTE_HOST/_PATH)")?;
        RsyncMirror::new(remote)
            .sync_to(&config.recordings_dir())
            .await?;
    }

    let orchestrator = build_orchestrator(config, shutdown_on_ctrl_c())?;
    let summary = orchestrator.run_once().await?;

    println!(
        "Processed {} call(s): {} completed, {} failed, {} left for next run",
        summary.admitted, summary.completed, summary.failed, summary.interrupted
    );

    Ok(())
}

async fn watch_pipeline(config: &Config, poll_interval: Duration) -> Result<()> {
    let shutdown = shutdown_on_ctrl_c();
    let orchestrator = build_orchestrator(config, shutdown.clone())?;

    watch_loop(
        orchestrator,
        config.recordings_dir(),
        poll_interval,
        shutdown,
    )
    .await
}

async fn show_status(config: &Config) -> Result<()> {
    let store = JobStore::open_read_only(config.jobs_path());
    let summary = store.summary().await?;

    println!(
        "{} call(s): {} in flight, {} done, {} failed",
        summary.total(),
        summary.in_flight,
        summary.done,
        summary.failed
    );

    if !summary.recent.is_empty() {
        println!("\nRecent:");
        for job in &summary.recent {
            let error = job
                .last_error
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default();
            println!("  {:<24} {:<12}{}", job.id, job.stage.to_string(), error);
        }
    }

    Ok(())
}

async fn retry_call(config: &Config, call_id: &str) -> Result<()> {
    let store = JobStore::open(config.jobs_path(), config.jobs_lock_path())
        .context("Another callscribe process owns the job store")?;

    store.requeue(call_id).await?;
    println!("{call_id} requeued; run `callscribe run` to process it");

    Ok(())
}
