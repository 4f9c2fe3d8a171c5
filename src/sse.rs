//! Server-Sent Events framing shared by the relay and the stream consumer.

use bytes::Bytes;
use serde_json::json;
use tracing::debug;

use crate::error::UpstreamError;

/// Prefix that marks an upstream chunk as already SSE-framed.
pub const DATA_PREFIX: &str = "data: ";

/// A single SSE event. `event: None` is the implicit "message" event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Terminal event for a stream that completed normally
    pub fn done() -> Self {
        Self::named("done", json!({ "status": "complete" }).to_string())
    }

    pub fn error(message: impl AsRef<str>) -> Self {
        Self::named("error", json!({ "error": message.as_ref() }).to_string())
    }

    /// Wire format for failures once streaming has begun. The outer HTTP
    /// status is already sent, so this event is the only failure channel.
    pub fn from_upstream_error(err: &UpstreamError) -> Self {
        Self::error(err.to_string())
    }

    /// Serialize as `field: value` lines followed by a blank line. Multi-line
    /// data becomes one `data:` line per line of payload.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.event {
            out.push_str("event: ");
            out.push_str(name);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str(DATA_PREFIX);
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// One unit written to the caller's body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Upstream bytes that were already SSE-framed, forwarded as received.
    Passthrough(Bytes),
    Event(SseEvent),
}

impl SseFrame {
    pub fn into_bytes(self) -> Bytes {
        match self {
            SseFrame::Passthrough(bytes) => bytes,
            SseFrame::Event(event) => Bytes::from(event.encode()),
        }
    }
}

/// Whether a raw upstream chunk is already SSE-framed.
pub fn is_preframed(chunk: &[u8]) -> bool {
    chunk.starts_with(DATA_PREFIX.as_bytes())
}

/// Turn one decoded upstream chunk into zero or more frames.
///
/// Pre-framed chunks pass through untouched. Anything else is re-framed one
/// event per non-blank line, so a sentence broken across lines upstream
/// arrives as several events.
pub fn frame_upstream_chunk(text: &str) -> Vec<SseFrame> {
    if text.starts_with(DATA_PREFIX) {
        return vec![SseFrame::Passthrough(Bytes::from(text.to_string()))];
    }

    let frames: Vec<SseFrame> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| SseFrame::Event(SseEvent::message(line)))
        .collect();

    debug!("🧩 Re-framed raw chunk into {} event(s)", frames.len());
    frames
}

/// Incremental UTF-8 decoder. Bytes of a character split across reads are
/// held back until the rest arrives; invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid_up_to]).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + bad);
                        }
                        None => {
                            // Incomplete trailing sequence, wait for more bytes.
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush at end of stream. A dangling partial character is replaced.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
