//! The fused, speaker-labeled conversation timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::segment::Leg;

/// One utterance in the merged timeline, tagged with its originating leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSegment {
    pub speaker: Leg,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f64,
}

/// The chronological conversation for one call.
///
/// Written once per call to `conversation.json`; immutable afterward. A
/// re-run with unchanged inputs overwrites it with identical bytes, which
/// is why `recorded_at` comes from the source file's mtime rather than the
/// processing clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedTranscript {
    pub call_id: String,

    /// When the call was recorded (source file mtime, UTC)
    pub recorded_at: DateTime<Utc>,

    /// Call length in seconds (longest leg)
    pub duration: f64,

    /// "speaker: text" lines, one per segment, in timeline order
    pub conversation_text: String,

    /// Globally sorted ascending by start; ties ordered store before customer
    pub segments: Vec<MergedSegment>,
}

impl MergedTranscript {
    /// Segments attributed to one leg, in timeline order
    pub fn leg_segments(&self, leg: Leg) -> impl Iterator<Item = &MergedSegment> {
        self.segments.iter().filter(move |s| s.speaker == leg)
    }
}
