//! Response buffering.
//!
//! A network body can be consumed once. When a response is going to be
//! logged, [`buffer_response`] reads it fully into memory so that the logger
//! and the caller each get an identical view. Event streams, bodies of unknown
//! length and bodies over the configured cap are passed through untouched.

use crate::{
    error::Result,
    headers::HttpHeaders,
    response::ResponseEnvelope,
};

/// Default cap on buffered bodies, in bytes.
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024;

/// Which responses get buffered and whether binary ones may be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Bodies longer than this are never buffered; `0` means no cap.
    pub max_bytes: u64,
    /// Render binary bodies into logs.
    pub log_binary_body: bool,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            log_binary_body: false,
        }
    }
}

/// Why a response was not buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassThroughReason {
    /// `text/event-stream` or another streaming content type.
    Streaming,
    /// No usable `Content-Length`.
    UnknownLength,
    /// `Content-Length` above the cap.
    TooLarge,
}

/// Outcome of [`BufferPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferDecision {
    /// Read the body into memory; `loggable` is false for binary bodies
    /// unless the policy allows them.
    Buffer { loggable: bool },
    /// Leave the body as it is.
    PassThrough(PassThroughReason),
}

/// Progress of one call through the buffering step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    NotStarted,
    InFlight,
    Buffered,
    PassThrough(PassThroughReason),
    Failed,
}

impl BufferState {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BufferState::Buffered | BufferState::PassThrough(_) | BufferState::Failed
        )
    }
}

impl BufferPolicy {
    /// Decides what to do with a response given its headers.
    pub fn decide(&self, headers: &HttpHeaders) -> BufferDecision {
        let content_type = headers.content_type().unwrap_or_default();
        if is_streaming(content_type) {
            return BufferDecision::PassThrough(PassThroughReason::Streaming);
        }
        let Some(length) = headers.content_length() else {
            return BufferDecision::PassThrough(PassThroughReason::UnknownLength);
        };
        if self.max_bytes > 0 && length > self.max_bytes {
            return BufferDecision::PassThrough(PassThroughReason::TooLarge);
        }
        BufferDecision::Buffer {
            loggable: self.is_loggable(content_type),
        }
    }

    /// Whether a body of this content type may be rendered into logs.
    pub fn is_loggable(&self, content_type: &str) -> bool {
        self.log_binary_body || !is_binary_content_type(content_type)
    }
}

/// `text/event-stream`, `application/stream+json`, `application/x-ndjson-stream`, ...
pub fn is_streaming(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("event-stream") || lower.contains("stream")
}

/// Whether a content type denotes a body that should not be rendered as text.
///
/// An empty content type is treated as text.
pub fn is_binary_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    let mime = lower.split(';').next().unwrap_or_default().trim();
    if mime.is_empty() {
        return false;
    }
    if mime.starts_with("text/")
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
        || ["json", "xml", "form", "javascript"]
            .iter()
            .any(|t| mime.contains(t) && !mime.starts_with("multipart/"))
    {
        return false;
    }
    if mime.starts_with("image/")
        || mime.starts_with("video/")
        || mime.starts_with("audio/")
        || mime.starts_with("multipart/")
        || ["octet-stream", "pdf", "zip", "gzip"]
            .iter()
            .any(|t| mime.contains(t))
    {
        return true;
    }
    mime.starts_with("application/")
}

/// Whether materialized bytes look binary, for responses without a content type.
pub fn sniff_binary(bytes: &[u8]) -> bool {
    match infer::get(bytes) {
        Some(kind) => is_binary_content_type(kind.mime_type()),
        None => std::str::from_utf8(bytes).is_err(),
    }
}

/// Applies `policy` to `response`.
///
/// Returns the (possibly buffered) response together with the state reached.
/// Status and headers are forwarded unchanged in every case.
pub async fn buffer_response(
    response: ResponseEnvelope,
    policy: &BufferPolicy,
) -> Result<(ResponseEnvelope, BufferState)> {
    match policy.decide(response.headers()) {
        BufferDecision::PassThrough(reason) => Ok((response, BufferState::PassThrough(reason))),
        BufferDecision::Buffer { .. } => {
            let buffered = response.into_buffered().await?;
            Ok((buffered, BufferState::Buffered))
        }
    }
}
