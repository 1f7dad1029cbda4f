//! Audio playback endpoint for the review dashboard.
//!
//! Serves the original recording when it is still around, falling back to
//! the requested leg's normalized waveform. A call that failed late in the
//! pipeline stays playable this way even though it has no transcript.

pub mod range;

use std::path::{Path, PathBuf};

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path as CallId, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::domain::Leg;

use range::RangePlan;

#[derive(Clone)]
struct ServeState {
    data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct AudioQuery {
    channel: Option<Leg>,
}

/// Build the audio router over the pipeline's data directory.
pub fn router(data_dir: PathBuf) -> Router {
    Router::new()
        .route("/api/audio/:id", get(serve_audio))
        .with_state(ServeState { data_dir })
}

/// Bind and serve until the process exits.
pub async fn serve(address: &str, data_dir: PathBuf) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address, data_dir = %data_dir.display(), "Serving call audio");

    axum::serve(listener, router(data_dir)).await?;

    Ok(())
}

/// Pick the file backing a playback request: original mp3 first, then the
/// requested leg's waveform. None when neither exists (or the id tries to
/// escape the data directory).
pub fn resolve_audio(
    data_dir: &Path,
    call_id: &str,
    channel: Leg,
) -> Option<(PathBuf, &'static str)> {
    if call_id.is_empty()
        || call_id.contains('/')
        || call_id.contains('\\')
        || call_id.contains("..")
    {
        return None;
    }

    let mp3 = data_dir
        .join("recordings")
        .join(format!("{call_id}.mp3"));
    if mp3.is_file() {
        return Some((mp3, "audio/mpeg"));
    }

    let wav = data_dir
        .join("whisper")
        .join(call_id)
        .join(channel.wav_name());
    wav.is_file().then_some((wav, "audio/wav"))
}

async fn serve_audio(
    State(state): State<ServeState>,
    CallId(call_id): CallId<String>,
    Query(query): Query<AudioQuery>,
    headers: HeaderMap,
) -> Response {
    let channel = query.channel.unwrap_or(Leg::Customer);

    let Some((path, content_type)) = resolve_audio(&state.data_dir, &call_id, channel) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let file_size = bytes.len() as u64;

    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let plan = range::plan(range_header, file_size);
    let (status, body) = match plan {
        RangePlan::Full => (StatusCode::OK, bytes),
        RangePlan::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            bytes[start as usize..=end as usize].to_vec(),
        ),
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, plan.content_length(file_size))
        .header(header::ACCEPT_RANGES, "bytes");

    if let Some(content_range) = plan.content_range(file_size) {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
