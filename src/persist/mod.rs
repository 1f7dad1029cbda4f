//! Persistence of merged transcripts in the serving layout.
//!
//! All writes go through a temp-file-then-rename so a concurrent reader
//! never observes a partially written file. Per-leg waveforms and the
//! original recording are kept in place for playback; this module only adds
//! the conversation artifacts next to them.

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::domain::MergedTranscript;

/// File name of the merged transcript under the call directory
pub const CONVERSATION_JSON: &str = "conversation.json";

/// Plain-text rendering for LLM/export consumers
pub const CONVERSATION_TXT: &str = "conversation.txt";

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Field order is fixed by the type definition, so identical values always
/// produce identical bytes.
pub async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), std::io::Error> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_atomic(path, &json).await
}

/// Atomically replace `path` with `bytes` via a `.tmp` sibling.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;

    Ok(())
}

/// Write the conversation artifacts for one call.
pub async fn write_transcript(
    call_dir: &Path,
    transcript: &MergedTranscript,
) -> Result<(), std::io::Error> {
    write_json_atomic(&call_dir.join(CONVERSATION_JSON), transcript).await?;

    let mut text = transcript.conversation_text.clone();
    text.push('\n');
    write_atomic(&call_dir.join(CONVERSATION_TXT), text.as_bytes()).await?;

    debug!(
        call = %transcript.call_id,
        segments = transcript.segments.len(),
        "Conversation persisted"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Leg, MergedSegment};
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn sample_transcript() -> MergedTranscript {
        MergedTranscript {
            call_id: "call-42".to_string(),
            recorded_at: DateTime::parse_from_rfc3339("2025-11-02T14:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            duration: 5.0,
            conversation_text: "customer: hi\nstore: hello".to_string(),
            segments: vec![
                MergedSegment {
                    speaker: Leg::Customer,
                    start: 0.0,
                    end: 5.0,
                    text: "hi".to_string(),
                    confidence: 0.9,
                },
                MergedSegment {
                    speaker: Leg::Store,
                    start: 2.0,
                    end: 4.0,
                    text: "hello".to_string(),
                    confidence: 0.8,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_write_transcript_emits_both_artifacts() {
        let temp = TempDir::new().unwrap();
        let transcript = sample_transcript();

        write_transcript(temp.path(), &transcript).await.unwrap();

        let json = tokio::fs::read_to_string(temp.path().join(CONVERSATION_JSON))
            .await
            .unwrap();
        let parsed: MergedTranscript = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.segments.len(), 2);

        let text = tokio::fs::read_to_string(temp.path().join(CONVERSATION_TXT))
            .await
            .unwrap();
        assert_eq!(text, "customer: hi\nstore: hello\n");
    }

    #[tokio::test]
    async fn test_rewrite_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let transcript = sample_transcript();
        let path = temp.path().join(CONVERSATION_JSON);

        write_transcript(temp.path(), &transcript).await.unwrap();
        let first = tokio::fs::read(&path).await.unwrap();

        write_transcript(temp.path(), &transcript).await.unwrap();
        let second = tokio::fs::read(&path).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_no_tmp_left_behind() {
        let temp = TempDir::new().unwrap();
        write_transcript(temp.path(), &sample_transcript())
            .await
            .unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(temp.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();

        assert_eq!(names, vec![CONVERSATION_JSON, CONVERSATION_TXT]);
    }
}
