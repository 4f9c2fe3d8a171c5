//! Client side of the prompt stream: turns the relay's SSE body back into
//! text chunks and a single outcome.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::sse::{Utf8Decoder, DATA_PREFIX};

/// What one `data:` line means to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Chunk(String),
    Done,
    Error(String),
}

/// Text received so far for one prompt. Only grows, and stops accepting
/// chunks once finalized.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    finalized: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Returns false if the accumulator is already final.
    pub fn push(&mut self, chunk: &str) -> bool {
        if self.finalized {
            return false;
        }
        self.text.push_str(chunk);
        true
    }

    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Incremental line parser for the relay's SSE output.
///
/// Decoding is stateful, and a line cut by a read boundary is held until its
/// newline arrives. The `event:` name of the event being read is tracked so
/// that `event: done` / `event: error` are honoured whatever their payload.
#[derive(Debug, Default)]
pub struct SseLineParser {
    decoder: Utf8Decoder,
    buffer: String,
    current_event: Option<String>,
}

impl SseLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamUpdate> {
        let text = self.decoder.decode(bytes);
        self.buffer.push_str(&text);

        let mut updates = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(update) = self.parse_line(line.trim_end_matches(['\n', '\r'])) {
                updates.push(update);
            }
        }
        updates
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<StreamUpdate> {
        let tail = self.decoder.finish();
        self.buffer.push_str(&tail);
        let rest = std::mem::take(&mut self.buffer);
        rest.lines().filter_map(|line| self.parse_line(line)).collect()
    }

    fn parse_line(&mut self, line: &str) -> Option<StreamUpdate> {
        if line.trim().is_empty() {
            self.current_event = None;
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.current_event = Some(name.trim().to_string());
            return None;
        }
        let payload = line.strip_prefix(DATA_PREFIX)?;

        let data: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(_) => {
                warn!("Failed to parse SSE line: {}", line);
                return None;
            }
        };

        match self.current_event.as_deref() {
            Some("done") => return Some(StreamUpdate::Done),
            Some("error") => {
                let message = data
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| payload.to_string());
                return Some(StreamUpdate::Error(message));
            }
            _ => {}
        }

        if let Some(chunk) = data.get("chunk").and_then(Value::as_str) {
            if !chunk.is_empty() {
                return Some(StreamUpdate::Chunk(chunk.to_string()));
            }
        }
        if data.get("done").and_then(Value::as_bool) == Some(true) {
            return Some(StreamUpdate::Done);
        }
        if let Some(message) = data.get("error").and_then(Value::as_str) {
            return Some(StreamUpdate::Error(message.to_string()));
        }

        debug!("Ignoring unrecognized payload: {}", payload);
        None
    }
}

/// Read a prompt response body to its outcome.
///
/// `on_chunk` sees the whole accumulated text after every chunk. Resolves
/// with the final text on `done`; an `error` event, a transport failure, a
/// body that ends without a terminal event, or cancellation are errors.
pub async fn consume_stream<S, E, F>(
    mut body: S,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> Result<String, ChatError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
    F: FnMut(&str),
{
    let mut parser = SseLineParser::new();
    let mut accumulator = StreamAccumulator::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ChatError::Cancelled { partial: accumulator.into_text() });
            }
            next = body.next() => next,
        };

        let (updates, ended) = match next {
            Some(Ok(bytes)) => (parser.feed(&bytes), false),
            Some(Err(e)) => return Err(ChatError::Transport(e.to_string())),
            None => (parser.finish(), true),
        };

        for update in updates {
            match update {
                StreamUpdate::Chunk(chunk) => {
                    if accumulator.push(&chunk) {
                        on_chunk(accumulator.text());
                    }
                }
                StreamUpdate::Done => {
                    accumulator.finalize();
                    return Ok(accumulator.into_text());
                }
                StreamUpdate::Error(message) => return Err(ChatError::Remote(message)),
            }
        }

        if ended {
            warn!("Stream ended without a done or error event");
            return Err(ChatError::Truncated {
                partial: accumulator.into_text(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::convert::Infallible;

    fn body(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
        let parts: Vec<Result<Bytes, Infallible>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        stream::iter(parts)
    }

    #[test]
    fn test_accumulator_stops_after_finalize() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.push("Hel"));
        assert!(acc.push("lo"));
        acc.finalize();
        assert!(!acc.push(" world"));
        assert_eq!(acc.text(), "Hello");
    }

    #[test]
    fn test_parser_payload_shapes() {
        let mut parser = SseLineParser::new();
        let updates = parser.feed(
            b"data: {\"chunk\":\"Hi\"}\n\ndata: {\"done\":true}\n\ndata: {\"error\":\"boom\"}\n\n",
        );
        assert_eq!(
            updates,
            vec![
                StreamUpdate::Chunk("Hi".into()),
                StreamUpdate::Done,
                StreamUpdate::Error("boom".into()),
            ]
        );
    }

    #[test]
    fn test_parser_honours_event_names() {
        let mut parser = SseLineParser::new();
        let updates = parser.feed(
            b"event: error\ndata: {\"error\":\"API returned error code: 503\"}\n\n\
              event: done\ndata: {\"status\":\"complete\"}\n\n",
        );
        assert_eq!(
            updates,
            vec![
                StreamUpdate::Error("API returned error code: 503".into()),
                StreamUpdate::Done,
            ]
        );
    }

    #[test]
    fn test_event_name_resets_after_blank_line() {
        let mut parser = SseLineParser::new();
        let updates = parser.feed(b"event: done\n\ndata: {\"chunk\":\"x\"}\n\n");
        assert_eq!(updates, vec![StreamUpdate::Chunk("x".into())]);
    }

    #[test]
    fn test_parser_skips_unparseable_lines() {
        let mut parser = SseLineParser::new();
        let updates = parser.feed(b"data: partial answer\n\ndata: {\"chunk\":\"ok\"}\n\n: comment\n");
        assert_eq!(updates, vec![StreamUpdate::Chunk("ok".into())]);
    }

    #[test]
    fn test_parser_line_split_across_reads() {
        let mut parser = SseLineParser::new();
        assert!(parser.feed(b"data: {\"chu").is_empty());
        assert_eq!(
            parser.feed(b"nk\":\"abc\"}\r\n\r\n"),
            vec![StreamUpdate::Chunk("abc".into())]
        );
    }

    #[test]
    fn test_parser_multibyte_across_reads() {
        let line = "data: {\"chunk\":\"caf\u{e9}\"}\n\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xc3).unwrap() + 1;

        let mut parser = SseLineParser::new();
        assert!(parser.feed(&line[..split]).is_empty());
        assert_eq!(parser.feed(&line[split..]), vec![StreamUpdate::Chunk("caf\u{e9}".into())]);
    }

    #[test]
    fn test_parser_finish_handles_unterminated_line() {
        let mut parser = SseLineParser::new();
        assert!(parser.feed(b"data: {\"done\":true}").is_empty());
        assert_eq!(parser.finish(), vec![StreamUpdate::Done]);
    }

    #[tokio::test]
    async fn test_consume_hello() {
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        let text = consume_stream(
            body(&[
                b"data: {\"chunk\":\"Hel\"}\n\n",
                b"data: {\"chunk\":\"lo\"}\n\n",
                b"event: done\ndata: {\"status\":\"complete\"}\n\n",
            ]),
            &cancel,
            |text| seen.push(text.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(text, "Hello");
        assert_eq!(seen, vec!["Hel", "Hello"]);
    }

    #[tokio::test]
    async fn test_consume_error_event_rejects() {
        let cancel = CancellationToken::new();
        let err = consume_stream(
            body(&[
                b"data: {\"chunk\":\"Hel\"}\n\n",
                b"event: error\ndata: {\"error\":\"API request failed: reset\"}\n\n",
            ]),
            &cancel,
            |_| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err, ChatError::Remote("API request failed: reset".into()));
    }

    #[tokio::test]
    async fn test_consume_without_terminal_event_is_truncated() {
        let cancel = CancellationToken::new();
        let err = consume_stream(body(&[b"data: {\"chunk\":\"part\"}\n\n"]), &cancel, |_| {})
            .await
            .unwrap_err();

        assert_eq!(err, ChatError::Truncated { partial: "part".into() });
    }

    #[tokio::test]
    async fn test_consume_transport_error() {
        let cancel = CancellationToken::new();
        let parts: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"data: {\"chunk\":\"a\"}\n\n")),
            Err("connection reset".to_string()),
        ];
        let err = consume_stream(stream::iter(parts), &cancel, |_| {})
            .await
            .unwrap_err();

        assert_eq!(err, ChatError::Transport("connection reset".into()));
    }

    #[tokio::test]
    async fn test_consume_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = consume_stream(stream::pending::<Result<Bytes, Infallible>>(), &cancel, |_| {})
            .await
            .unwrap_err();

        assert_eq!(err, ChatError::Cancelled { partial: String::new() });
    }
}
