//! Channel splitter: one normalized mono waveform per call leg.
//!
//! Shells out to ffmpeg. The stereo source carries the customer on the left
//! channel and the store on the right; each leg is loudness-normalized,
//! resampled, and written as mono pcm_s16le. Output lands in a `.tmp`
//! sibling first and is renamed into place, so an existing target file is
//! always a complete one and re-invocation is a no-op.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::domain::Leg;

/// Errors from leg extraction
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("Source recording not found: {0}")]
    SourceMissing(PathBuf),

    #[error("ffmpeg failed extracting {leg} leg of {input}: {stderr}")]
    Ffmpeg {
        input: PathBuf,
        leg: Leg,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam for leg extraction; the pipeline only sees this contract.
#[async_trait]
pub trait ChannelSplitter: Send + Sync {
    /// Extract `leg` from `source` into the normalized mono waveform at
    /// `out`. Must be a no-op when a complete `out` already exists.
    async fn split(&self, source: &Path, leg: Leg, out: &Path) -> Result<(), SplitError>;
}

/// ffmpeg-backed splitter
pub struct FfmpegSplitter {
    pub sample_rate: u32,
}

impl FfmpegSplitter {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Audio filter chain: pick the leg's channel, normalize loudness,
    /// resample to the target rate
    fn filter(&self, leg: Leg) -> String {
        format!(
            "pan=mono|c0=c{},dynaudnorm=p=0.9:s=5,aresample={}",
            leg.channel_index(),
            self.sample_rate
        )
    }
}

#[async_trait]
impl ChannelSplitter for FfmpegSplitter {
    async fn split(&self, source: &Path, leg: Leg, out: &Path) -> Result<(), SplitError> {
        if out.exists() {
            debug!(out = %out.display(), "Leg waveform already present, skipping");
            return Ok(());
        }

        if !source.exists() {
            return Err(SplitError::SourceMissing(source.to_path_buf()));
        }

        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // A leftover .tmp from a crashed run is simply overwritten
        let tmp = out.with_extension("wav.tmp");

        let output = Command::new("ffmpeg")
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-y")
            .arg("-i")
            .arg(source)
            .args(["-af", &self.filter(leg)])
            .args(["-ac", "1"])
            .args(["-c:a", "pcm_s16le"])
            .args(["-f", "wav"])
            .arg(&tmp)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SplitError::Ffmpeg {
                input: source.to_path_buf(),
                leg,
                stderr,
            });
        }

        tokio::fs::rename(&tmp, out).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_filter_selects_leg_channel() {
        let splitter = FfmpegSplitter::new(16_000);

        assert_eq!(
            splitter.filter(Leg::Customer),
            "pan=mono|c0=c0,dynaudnorm=p=0.9:s=5,aresample=16000"
        );
        assert_eq!(
            splitter.filter(Leg::Store),
            "pan=mono|c0=c1,dynaudnorm=p=0.9:s=5,aresample=16000"
        );
    }

    #[tokio::test]
    async fn test_existing_output_short_circuits() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("customer.wav");
        tokio::fs::write(&out, b"complete waveform").await.unwrap();

        // Source deliberately absent: the existence check must win
        let splitter = FfmpegSplitter::new(16_000);
        let missing = temp.path().join("nope.mp3");
        splitter.split(&missing, Leg::Customer, &out).await.unwrap();

        let bytes = tokio::fs::read(&out).await.unwrap();
        assert_eq!(bytes, b"complete waveform");
    }

    #[tokio::test]
    async fn test_missing_source_errors() {
        let temp = TempDir::new().unwrap();
        let splitter = FfmpegSplitter::new(16_000);

        let err = splitter
            .split(
                &temp.path().join("absent.mp3"),
                Leg::Store,
                &temp.path().join("store.wav"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SplitError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn test_leftover_tmp_is_not_an_output() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("store.wav");
        tokio::fs::write(out.with_extension("wav.tmp"), b"truncated")
            .await
            .unwrap();

        // The half-written tmp must not satisfy the existence check
        let splitter = FfmpegSplitter::new(16_000);
        let err = splitter
            .split(&temp.path().join("absent.mp3"), Leg::Store, &out)
            .await
            .unwrap_err();
        assert!(matches!(err, SplitError::SourceMissing(_)));
    }
}
