//! Transcription worker: one leg waveform in, one sanitized transcript out.
//!
//! Wraps the speech engine with the pipeline's guarantees: output is sorted
//! and free of degenerate segments, an accelerator that runs out of memory
//! gets one automatic CPU retry, and results are cached on disk keyed by
//! (audio content hash, model) so re-runs never touch the engine.

pub mod engine;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Device, ResolvedDevice};
use crate::domain::{sanitize_segments, Leg, LegTranscript};
use crate::persist::write_json_atomic;
use crate::store::file_sha256;

pub use engine::{EngineOutput, SpeechEngine, TranscriptionError, WhisperCli};

/// Drives the speech engine for one leg at a time.
pub struct TranscriptionWorker {
    engine: Arc<dyn SpeechEngine>,
    model: String,
    device: ResolvedDevice,
}

impl TranscriptionWorker {
    pub fn new(engine: Arc<dyn SpeechEngine>, model: String, device: Device) -> Self {
        Self {
            engine,
            model,
            device: device.resolve(),
        }
    }

    /// The device transcription will actually run on
    pub fn device(&self) -> ResolvedDevice {
        self.device
    }

    /// Transcribe one leg of a call, reusing the cached transcript when its
    /// key still matches the waveform and model.
    pub async fn transcribe_leg(
        &self,
        call_dir: &Path,
        leg: Leg,
    ) -> Result<LegTranscript, TranscriptionError> {
        let wav = call_dir.join(leg.wav_name());
        let transcript_path = call_dir.join(leg.transcript_name());

        let audio_sha256 = file_sha256(&wav).await?;

        if let Some(cached) = load_cached(&transcript_path, &audio_sha256, &self.model).await {
            debug!(leg = %leg, "Reusing cached leg transcript");
            return Ok(cached);
        }

        let (output, device) = self.run_engine(&wav).await?;

        let transcript = LegTranscript {
            leg,
            model: self.model.clone(),
            device: device.as_str().to_string(),
            audio_sha256,
            duration: output.duration,
            segments: sanitize_segments(output.segments),
        };

        write_json_atomic(&transcript_path, &transcript).await?;

        info!(
            leg = %leg,
            segments = transcript.segments.len(),
            device = device.as_str(),
            "Leg transcribed"
        );

        Ok(transcript)
    }

    /// Invoke the engine, downgrading accelerator → CPU once on exhaustion
    async fn run_engine(
        &self,
        wav: &Path,
    ) -> Result<(EngineOutput, ResolvedDevice), TranscriptionError> {
        match self.engine.transcribe(wav, &self.model, self.device).await {
            Ok(output) => Ok((output, self.device)),
            Err(e) if e.is_device_exhausted() && self.device.is_accelerator() => {
                warn!(error = %e, "Accelerator exhausted, retrying on CPU");
                let output = self
                    .engine
                    .transcribe(wav, &self.model, ResolvedDevice::Cpu)
                    .await?;
                Ok((output, ResolvedDevice::Cpu))
            }
            Err(e) => Err(e),
        }
    }
}

/// Read a cached leg transcript if its key matches; unreadable or stale
/// files count as absent.
async fn load_cached(path: &Path, audio_sha256: &str, model: &str) -> Option<LegTranscript> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let cached: LegTranscript = serde_json::from_str(&content).ok()?;

    (cached.audio_sha256 == audio_sha256 && cached.model == model).then_some(cached)
}

/// Load a previously written leg transcript without a key check, for the
/// merge stage (the transcribe stage already validated the key).
pub async fn load_transcript(
    call_dir: &Path,
    leg: Leg,
) -> Result<LegTranscript, std::io::Error> {
    let path = call_dir.join(leg.transcript_name());
    let content = tokio::fs::read_to_string(&path).await?;
    serde_json::from_str(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
