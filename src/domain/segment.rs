//! Per-leg speech recognition output.
//!
//! A two-party call recording carries one audio track per side. The splitter
//! maps the customer to the left channel and the store/agent to the right,
//! and every recognized utterance stays tagged with the leg it came from.

use serde::{Deserialize, Serialize};

/// One side of a two-party call recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Customer,
    Store,
}

impl Leg {
    /// Both legs in channel order (left, right)
    pub const ALL: [Leg; 2] = [Leg::Customer, Leg::Store];

    pub fn as_str(self) -> &'static str {
        match self {
            Leg::Customer => "customer",
            Leg::Store => "store",
        }
    }

    /// Source channel in the stereo recording: customer = left (c0),
    /// store = right (c1)
    pub fn channel_index(self) -> u8 {
        match self {
            Leg::Customer => 0,
            Leg::Store => 1,
        }
    }

    /// Normalized waveform file name under the call directory
    pub fn wav_name(self) -> &'static str {
        match self {
            Leg::Customer => "customer.wav",
            Leg::Store => "store.wav",
        }
    }

    /// Per-leg transcript file name under the call directory
    pub fn transcript_name(self) -> &'static str {
        match self {
            Leg::Customer => "customer.json",
            Leg::Store => "store.json",
        }
    }
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Leg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Leg::Customer),
            "store" => Ok(Leg::Store),
            other => Err(format!("unknown leg: {other}")),
        }
    }
}

/// A single timestamped unit of recognized speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Seconds from the start of the leg's waveform
    pub start: f64,

    /// Seconds from the start of the leg's waveform, `start < end`
    pub end: f64,

    /// Recognized text, trimmed
    pub text: String,

    /// Engine confidence in [0, 1]
    pub confidence: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Engine output for one leg plus the key that makes it reusable.
///
/// Cached at `data/whisper/{call}/{leg}.json`. A re-run reuses the file when
/// (audio_sha256, model, device) still match, so the pipeline stays
/// idempotent even when the engine itself is not deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegTranscript {
    pub leg: Leg,
    pub model: String,
    pub device: String,
    pub audio_sha256: String,

    /// Length of the leg's waveform in seconds
    pub duration: f64,

    /// Non-overlapping, sorted ascending by start
    pub segments: Vec<Segment>,
}

/// Drop degenerate engine output and restore the sort order.
///
/// Removes segments with empty text, non-positive duration, or non-finite
/// timestamps, trims text, clamps confidence into [0, 1], and sorts by
/// (start, end). The engine contract promises sorted non-overlapping
/// output per leg, but downstream code must not depend on it.
pub fn sanitize_segments(segments: Vec<Segment>) -> Vec<Segment> {
    let mut kept: Vec<Segment> = segments
        .into_iter()
        .filter(|s| s.start.is_finite() && s.end.is_finite() && s.end > s.start)
        .filter_map(|s| {
            let text = s.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(Segment {
                start: s.start,
                end: s.end,
                text: text.to_string(),
                confidence: if s.confidence.is_finite() {
                    s.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                },
            })
        })
        .collect();

    kept.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then_with(|| a.end.total_cmp(&b.end))
    });

    kept
}
