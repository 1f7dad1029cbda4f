//! Byte-range planning for audio playback.
//!
//! Deliberately looser than RFC 7233: only the explicit `bytes=start-end`
//! form is honored, and any range that does not cleanly fit inside the file
//! (end beyond the file, start after end, suffix and open-ended forms)
//! downgrades to serving the whole file with a normal success status.

/// How to answer a request against a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePlan {
    /// 200 with the entire file
    Full,

    /// 206 with the inclusive byte window `start..=end`
    Partial { start: u64, end: u64 },
}

impl RangePlan {
    /// Bytes the response body will carry
    pub fn content_length(&self, file_size: u64) -> u64 {
        match self {
            RangePlan::Full => file_size,
            RangePlan::Partial { start, end } => end - start + 1,
        }
    }

    /// `Content-Range` header value for partial responses
    pub fn content_range(&self, file_size: u64) -> Option<String> {
        match self {
            RangePlan::Full => None,
            RangePlan::Partial { start, end } => {
                Some(format!("bytes {}-{}/{}", start, end, file_size))
            }
        }
    }
}

/// Decide how to serve a file given the request's Range header, if any.
pub fn plan(range_header: Option<&str>, file_size: u64) -> RangePlan {
    let Some(header) = range_header else {
        return RangePlan::Full;
    };

    match parse_bounds(header) {
        Some((start, end)) if start <= end && end < file_size => {
            RangePlan::Partial { start, end }
        }
        // Unparsable or out-of-bounds ranges serve the full file
        _ => RangePlan::Full,
    }
}

/// Extract (start, end) from `bytes=start-end`; both bounds required
fn parse_bounds(header: &str) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;

    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
