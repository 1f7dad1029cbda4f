//! Recording acquisition from the phone system.
//!
//! Acquisition is a collaborator, not a pipeline stage: whatever recordings
//! land in the recordings directory get picked up by discovery. The trait
//! keeps the orchestrator ignorant of the transport; the rsync mirror is
//! the one transport the deployment actually uses.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::config::RemoteEndpoint;

/// Transient acquisition failures; callers retry with backoff
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("rsync exited with {status}: {stderr}")]
    Rsync { status: i32, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a sync pass brought in
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Files transferred this pass
    pub transferred: usize,
}

/// A place recordings come from.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// Mirror remote recordings into `dest`. Must leave already-present
    /// files untouched.
    async fn sync_to(&self, dest: &Path) -> Result<SyncStats, SyncError>;
}

/// rsync-over-ssh mirror of the phone system's recording directory.
pub struct RsyncMirror {
    remote: RemoteEndpoint,
}

impl RsyncMirror {
    pub fn new(remote: RemoteEndpoint) -> Self {
        Self { remote }
    }

    fn source_spec(&self) -> String {
        let path = self.remote.path.trim_end_matches('/');
        format!("{}:{}/", self.remote.host, path)
    }
}

#[async_trait]
impl RecordingSource for RsyncMirror {
    async fn sync_to(&self, dest: &Path) -> Result<SyncStats, SyncError> {
        tokio::fs::create_dir_all(dest).await?;

        let output = Command::new("rsync")
            .args(["-az", "--itemize-changes"])
            .args(["-e", "ssh -oBatchMode=yes -oServerAliveInterval=15"])
            .arg(self.source_spec())
            .arg(dest)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(SyncError::Rsync {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // Itemized lines starting ">f" are files received from the remote
        let transferred = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| line.starts_with(">f"))
            .count();

        info!(transferred, host = %self.remote.host, "Recordings synced");

        Ok(SyncStats { transferred })
    }
}
