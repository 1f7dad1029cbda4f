//! Recordings-directory watcher for continuous processing.
//!
//! Triggered discovery: a debounced filesystem watch on the recordings
//! directory kicks off a pipeline pass when new mp3s land, with a periodic
//! rescan as the safety net for events the watcher misses (rsync temp-file
//! renames, network filesystems).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tokio::sync::watch;
use tracing::{info, warn};

use super::orchestrator::Orchestrator;

/// How long the filesystem must stay quiet before events fire
const DEBOUNCE: Duration = Duration::from_secs(2);

fn is_recording(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

/// Watch the recordings directory and run pipeline passes until shutdown.
pub async fn watch_loop(
    orchestrator: Arc<Orchestrator>,
    recordings_dir: PathBuf,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tokio::fs::create_dir_all(&recordings_dir).await?;

    // Catch up on whatever arrived while we were down
    let summary = orchestrator.run_once().await?;
    info!(
        admitted = summary.admitted,
        completed = summary.completed,
        failed = summary.failed,
        "Initial pass complete"
    );

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(DEBOUNCE, tx)?;
    debouncer
        .watcher()
        .watch(&recordings_dir, RecursiveMode::NonRecursive)?;

    info!(dir = %recordings_dir.display(), "Watching for new recordings");

    let mut last_pass = Instant::now();

    loop {
        if *shutdown.borrow() {
            info!("Watcher stopping...");
            break;
        }

        let mut dirty = false;

        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                dirty = events.iter().any(|event| is_recording(&event.path));
            }
            Ok(Err(e)) => {
                warn!("Watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Expected - fall through to the periodic rescan check
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                warn!("Watcher channel disconnected");
                break;
            }
        }

        if dirty || last_pass.elapsed() >= poll_interval {
            let summary = orchestrator.run_once().await?;
            if summary.admitted > 0 {
                info!(
                    admitted = summary.admitted,
                    completed = summary.completed,
                    failed = summary.failed,
                    "Pass complete"
                );
            }
            last_pass = Instant::now();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_recordings_trigger() {
        assert!(is_recording(Path::new("/data/recordings/call-1.mp3")));
        assert!(is_recording(Path::new("/data/recordings/CALL-2.MP3")));
        assert!(!is_recording(Path::new("/data/recordings/.call-1.mp3.tmp")));
        assert!(!is_recording(Path::new("/data/recordings/notes.txt")));
    }
}
