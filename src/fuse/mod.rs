//! Timeline fusion: two per-leg segment streams into one conversation.
//!
//! A two-pointer merge over both legs ordered by start time, O(n+m). Each
//! emitted segment keeps its original timing and is tagged with the leg it
//! came from; overlapping cross-talk is ordered, never truncated. Ties on
//! start time put the store/agent leg first — a fixed policy, the agent
//! usually initiates overlapping speech. The merge itself has no source of
//! nondeterminism: fixed inputs produce byte-identical output.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Leg, LegTranscript, MergedSegment, MergedTranscript, Segment};

/// Errors from timeline fusion.
///
/// Inputs are sanitized by the transcription worker before they get here,
/// so these fire only on malformed data fed in from elsewhere.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Invalid segment in {leg} leg: start {start}, end {end}")]
    InvalidSegment { leg: Leg, start: f64, end: f64 },
}

/// Merge two per-leg transcripts into one chronological timeline.
///
/// A leg with zero segments is valid and yields a merge equal to the other
/// leg, correctly labeled.
pub fn fuse(
    call_id: &str,
    recorded_at: DateTime<Utc>,
    customer: &LegTranscript,
    store: &LegTranscript,
) -> Result<MergedTranscript, MergeError> {
    let customer_segs = checked_sorted(Leg::Customer, &customer.segments)?;
    let store_segs = checked_sorted(Leg::Store, &store.segments)?;

    let mut segments = Vec::with_capacity(customer_segs.len() + store_segs.len());
    let (mut c, mut s) = (0, 0);

    while c < customer_segs.len() && s < store_segs.len() {
        // Equal starts emit the store leg first
        if store_segs[s].start <= customer_segs[c].start {
            segments.push(tagged(Leg::Store, &store_segs[s]));
            s += 1;
        } else {
            segments.push(tagged(Leg::Customer, &customer_segs[c]));
            c += 1;
        }
    }
    segments.extend(customer_segs[c..].iter().map(|seg| tagged(Leg::Customer, seg)));
    segments.extend(store_segs[s..].iter().map(|seg| tagged(Leg::Store, seg)));

    let conversation_text = segments
        .iter()
        .map(|seg| format!("{}: {}", seg.speaker, seg.text))
        .collect::<Vec<_>>()
        .join("\n");

    let last_end = segments.iter().map(|s| s.end).fold(0.0, f64::max);
    let duration = customer.duration.max(store.duration).max(last_end);

    Ok(MergedTranscript {
        call_id: call_id.to_string(),
        recorded_at,
        duration,
        conversation_text,
        segments,
    })
}

/// Validate one leg's segments and return them sorted by (start, end).
///
/// The engine contract promises sorted non-overlapping output, but the
/// merge must not assume it held.
fn checked_sorted(leg: Leg, segments: &[Segment]) -> Result<Vec<Segment>, MergeError> {
    for seg in segments {
        let finite = seg.start.is_finite() && seg.end.is_finite();
        if !finite || seg.end < seg.start {
            return Err(MergeError::InvalidSegment {
                leg,
                start: seg.start,
                end: seg.end,
            });
        }
    }

    let mut sorted = segments.to_vec();
    sorted.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then_with(|| a.end.total_cmp(&b.end))
    });

    Ok(sorted)
}

fn tagged(speaker: Leg, seg: &Segment) -> MergedSegment {
    MergedSegment {
        speaker,
        start: seg.start,
        end: seg.end,
        text: seg.text.clone(),
        confidence: seg.confidence,
    }
}
