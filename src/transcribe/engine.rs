//! Speech engine seam and the whisper CLI backend.
//!
//! The engine is a black box: given a mono waveform it returns ordered,
//! timestamped text segments with confidence scores. The pipeline never
//! depends on a concrete engine beyond this trait.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::ResolvedDevice;
use crate::domain::Segment;

/// Errors from the speech engine
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Speech engine failed: {stderr}")]
    Engine { stderr: String },

    #[error("Accelerator out of memory: {0}")]
    DeviceExhausted(String),

    #[error("Unreadable engine output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscriptionError {
    /// Failures that warrant the one-shot accelerator → CPU downgrade
    pub fn is_device_exhausted(&self) -> bool {
        matches!(self, TranscriptionError::DeviceExhausted(_))
    }
}

/// Raw engine output for one waveform
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Waveform length in seconds
    pub duration: f64,

    /// As reported by the engine; callers sanitize before use
    pub segments: Vec<Segment>,
}

/// Black-box speech recognizer
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        model: &str,
        device: ResolvedDevice,
    ) -> Result<EngineOutput, TranscriptionError>;
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: f64,
}

/// Shells out to a local whisper binary with JSON output.
pub struct WhisperCli {
    pub binary: PathBuf,
    pub language: String,
}

impl WhisperCli {
    pub fn new(binary: PathBuf, language: String) -> Self {
        Self { binary, language }
    }
}

#[async_trait]
impl SpeechEngine for WhisperCli {
    async fn transcribe(
        &self,
        audio: &Path,
        model: &str,
        device: ResolvedDevice,
    ) -> Result<EngineOutput, TranscriptionError> {
        // Whisper writes its JSON next to a directory we control
        let temp_dir = tempfile::tempdir()?;

        debug!(audio = %audio.display(), model, device = device.as_str(), "Running whisper");

        let output = Command::new(&self.binary)
            .arg(audio)
            .args(["--model", model])
            .args(["--device", device.as_str()])
            .arg("--output_dir")
            .arg(temp_dir.path())
            .args(["--output_format", "json"])
            .args(["--language", &self.language])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let lowered = stderr.to_lowercase();
            if lowered.contains("out of memory") || lowered.contains("cuda error") {
                return Err(TranscriptionError::DeviceExhausted(stderr));
            }
            return Err(TranscriptionError::Engine { stderr });
        }

        let stem = audio.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));
        let json_content = tokio::fs::read_to_string(&json_path).await?;

        let whisper: WhisperOutput = serde_json::from_str(&json_content)?;

        let duration = whisper.segments.last().map(|s| s.end).unwrap_or(0.0);
        let segments = whisper
            .segments
            .into_iter()
            .map(|s| Segment {
                start: s.start,
                end: s.end,
                text: s.text,
                // avg_logprob is ln(p) per token; exp maps it back to [0, 1]
                confidence: s.avg_logprob.exp().clamp(0.0, 1.0),
            })
            .collect();

        Ok(EngineOutput { duration, segments })
    }
}
