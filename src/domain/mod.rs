//! Domain types for the callscribe pipeline.
//!
//! This module contains the core data structures:
//! - CallJob: per-recording processing state
//! - Leg/Segment: per-leg speech recognition output
//! - MergedTranscript: the fused, speaker-labeled timeline

pub mod call;
pub mod segment;
pub mod transcript;

// Re-export commonly used types
pub use call::{CallJob, Stage};
pub use segment::{sanitize_segments, Leg, LegTranscript, Segment};
pub use transcript::{MergedSegment, MergedTranscript};
