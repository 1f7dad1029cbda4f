//! Call job state and the processing stage machine.
//!
//! A CallJob tracks one source recording through the pipeline. The stored
//! stage is the single source of truth for what work remains: after a crash
//! the orchestrator re-derives the next action from it alone.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing stage of a call.
///
/// Each value names the last milestone that completed. Stages only move
/// forward; `Done` and `Failed` are terminal. A failed call can be requeued
/// to `Discovered`, which is the one sanctioned backward edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Source recording seen, no work done yet
    Discovered,

    /// Per-leg waveforms extracted
    Split,

    /// Per-leg transcripts produced
    Transcribed,

    /// Fused transcript persisted
    Merged,

    /// All work complete
    Done,

    /// Retry budget exhausted; kept as an audit record
    Failed,
}

impl Stage {
    /// The stage that follows this one in pipeline order
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Discovered => Some(Stage::Split),
            Stage::Split => Some(Stage::Transcribed),
            Stage::Transcribed => Some(Stage::Merged),
            Stage::Merged => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// The work performed while a job sits at this milestone
    pub fn work_label(self) -> &'static str {
        match self {
            Stage::Discovered => "split",
            Stage::Split => "transcribe",
            Stage::Transcribed => "merge",
            Stage::Merged => "finalize",
            Stage::Done | Stage::Failed => "none",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Discovered => "discovered",
            Stage::Split => "split",
            Stage::Transcribed => "transcribed",
            Stage::Merged => "merged",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state for one source recording.
///
/// Derived by replaying the job store's event log; never constructed by
/// pipeline stages directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallJob {
    /// Stable identifier: the source file stem (`data/recordings/{id}.mp3`)
    pub id: String,

    /// Location of the original dual-leg recording
    pub source_path: PathBuf,

    /// Content hash of the source bytes (12 hex chars)
    pub source_hash: String,

    /// Last completed milestone
    pub stage: Stage,

    /// Failed attempts of the stage currently being worked; reset on advance
    pub attempts: u32,

    /// Last failure reason, if any
    pub last_error: Option<String>,

    /// When the source was first discovered
    pub discovered_at: DateTime<Utc>,

    /// When the job last changed
    pub updated_at: DateTime<Utc>,
}

impl CallJob {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::Discovered;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }

        assert_eq!(
            seen,
            vec![
                Stage::Discovered,
                Stage::Split,
                Stage::Transcribed,
                Stage::Merged,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn test_terminal_stages() {
        assert!(Stage::Done.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(Stage::Failed.next().is_none());
        assert!(!Stage::Merged.is_terminal());
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_string(&Stage::Transcribed).unwrap();
        assert_eq!(json, "\"transcribed\"");

        let parsed: Stage = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, Stage::Failed);
    }
}
