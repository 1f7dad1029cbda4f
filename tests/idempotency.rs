//! Pipeline Idempotency Integration Tests
//!
//! End-to-end runs over mock tools: a second run on unchanged inputs must
//! produce byte-identical output without re-invoking the splitter or the
//! speech engine, and a restart must resume from the recorded stage.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callscribe::config::{Device, ResolvedDevice};
use callscribe::domain::{Leg, MergedTranscript, Segment, Stage};
use callscribe::pipeline::{Orchestrator, PipelineSettings, RetryPolicy};
use callscribe::split::{ChannelSplitter, SplitError};
use callscribe::store::JobStore;
use callscribe::transcribe::{
    EngineOutput, SpeechEngine, TranscriptionError, TranscriptionWorker,
};
use filetime::FileTime;
use tempfile::TempDir;
use tokio::sync::watch;

/// Splitter that fabricates leg waveforms and counts every invocation
struct CountingSplitter {
    calls: AtomicUsize,
}

impl CountingSplitter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChannelSplitter for CountingSplitter {
    async fn split(&self, source: &Path, leg: Leg, out: &Path) -> Result<(), SplitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !source.exists() {
            return Err(SplitError::SourceMissing(source.to_path_buf()));
        }

        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(out, format!("pcm for {leg}")).await?;

        Ok(())
    }
}

/// Engine that returns the spec's end-to-end scenario per leg
struct ScriptedEngine {
    calls: AtomicUsize,
}

impl ScriptedEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

fn segment(start: f64, end: f64, text: &str) -> Segment {
    Segment {
        start,
        end,
        text: text.to_string(),
        confidence: 0.9,
    }
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    async fn transcribe(
        &self,
        audio: &Path,
        _model: &str,
        _device: ResolvedDevice,
    ) -> Result<EngineOutput, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let stem = audio.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let (duration, segments) = match stem {
            "customer" => (5.0, vec![segment(0.0, 5.0, "hi")]),
            "store" => (4.0, vec![segment(2.0, 4.0, "hello")]),
            other => panic!("unexpected waveform {other}"),
        };

        Ok(EngineOutput { duration, segments })
    }
}

struct Harness {
    temp: TempDir,
    splitter: Arc<CountingSplitter>,
    engine: Arc<ScriptedEngine>,
}

impl Harness {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            splitter: CountingSplitter::new(),
            engine: ScriptedEngine::new(),
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    fn recordings_dir(&self) -> PathBuf {
        self.data_dir().join("recordings")
    }

    fn whisper_dir(&self) -> PathBuf {
        self.data_dir().join("whisper")
    }

    async fn seed_recording(&self, id: &str) {
        tokio::fs::create_dir_all(self.recordings_dir()).await.unwrap();
        let path = self.recordings_dir().join(format!("{id}.mp3"));
        tokio::fs::write(&path, format!("mpeg bytes of {id}")).await.unwrap();

        // Pin the mtime so recorded_at is a known, stable value
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    }

    fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            recordings_dir: self.recordings_dir(),
            whisper_dir: self.whisper_dir(),
            split_workers: 2,
            transcribe_workers: 2,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
            },
        }
    }

    fn orchestrator(&self) -> Arc<Orchestrator> {
        let store = JobStore::open(
            self.data_dir().join("jobs.jsonl"),
            self.data_dir().join("jobs.lock"),
        )
        .unwrap();

        let worker = TranscriptionWorker::new(
            self.engine.clone(),
            "large-v3-turbo".to_string(),
            Device::Cpu,
        );

        let (_tx, rx) = watch::channel(false);
        Orchestrator::new(store, self.splitter.clone(), worker, self.settings(), rx)
    }

    async fn conversation_bytes(&self, id: &str) -> Vec<u8> {
        tokio::fs::read(self.whisper_dir().join(id).join("conversation.json"))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn second_run_is_a_byte_identical_no_op() {
    let harness = Harness::new();
    harness.seed_recording("call-42").await;

    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run_once().await.unwrap();
    drop(orchestrator);

    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);

    assert_eq!(harness.splitter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.engine.calls.load(Ordering::SeqCst), 2);

    let first = harness.conversation_bytes("call-42").await;

    // Fresh orchestrator, same store and data: nothing should run
    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run_once().await.unwrap();
    drop(orchestrator);

    assert_eq!(summary.admitted, 0);
    assert_eq!(harness.splitter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.engine.calls.load(Ordering::SeqCst), 2);

    let second = harness.conversation_bytes("call-42").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn merged_output_matches_scenario() {
    let harness = Harness::new();
    harness.seed_recording("call-42").await;

    let orchestrator = harness.orchestrator();
    orchestrator.run_once().await.unwrap();

    let bytes = harness.conversation_bytes("call-42").await;
    let merged: MergedTranscript = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(merged.call_id, "call-42");
    assert_eq!(merged.recorded_at.timestamp(), 1_700_000_000);
    assert_eq!(merged.duration, 5.0);

    // customer starts at 0, store at 2: order by start, no tie involved
    assert_eq!(merged.segments.len(), 2);
    assert_eq!(merged.segments[0].speaker, Leg::Customer);
    assert_eq!(merged.segments[0].text, "hi");
    assert_eq!(merged.segments[1].speaker, Leg::Store);
    assert_eq!(merged.segments[1].text, "hello");

    let txt = tokio::fs::read_to_string(
        harness.whisper_dir().join("call-42").join("conversation.txt"),
    )
    .await
    .unwrap();
    assert_eq!(txt, "customer: hi\nstore: hello\n");
}

#[tokio::test]
async fn restart_resumes_from_recorded_stage() {
    let harness = Harness::new();
    harness.seed_recording("call-7").await;

    // Simulate a run that crashed right after the split stage advanced
    {
        let store = JobStore::open(
            harness.data_dir().join("jobs.jsonl"),
            harness.data_dir().join("jobs.lock"),
        )
        .unwrap();
        store.discover_new(&harness.recordings_dir()).await.unwrap();
        store.advance("call-7", Stage::Split).await.unwrap();
    }

    let call_dir = harness.whisper_dir().join("call-7");
    tokio::fs::create_dir_all(&call_dir).await.unwrap();
    tokio::fs::write(call_dir.join("customer.wav"), b"pcm for customer")
        .await
        .unwrap();
    tokio::fs::write(call_dir.join("store.wav"), b"pcm for store")
        .await
        .unwrap();

    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run_once().await.unwrap();

    assert_eq!(summary.completed, 1);

    // Split was already recorded as done, so the splitter never ran
    assert_eq!(harness.splitter.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn one_failing_call_does_not_poison_the_rest() {
    let harness = Harness::new();
    harness.seed_recording("call-good").await;

    // call-bad has a job record but its source vanishes before the run
    harness.seed_recording("call-bad").await;
    {
        let store = JobStore::open(
            harness.data_dir().join("jobs.jsonl"),
            harness.data_dir().join("jobs.lock"),
        )
        .unwrap();
        store.discover_new(&harness.recordings_dir()).await.unwrap();
    }
    tokio::fs::remove_file(harness.recordings_dir().join("call-bad.mp3"))
        .await
        .unwrap();

    let orchestrator = harness.orchestrator();
    let summary = orchestrator.run_once().await.unwrap();

    assert_eq!(summary.admitted, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let store = orchestrator.store();
    let good = store.get("call-good").await.unwrap().unwrap();
    assert_eq!(good.stage, Stage::Done);

    let bad = store.get("call-bad").await.unwrap().unwrap();
    assert_eq!(bad.stage, Stage::Failed);
    assert!(bad.last_error.as_deref().unwrap().contains("split"));
}
