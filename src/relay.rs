use std::time::Instant;

use bytes::Bytes;
use futures::{future, stream, Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::UpstreamError;
use crate::request::ChatRequest;
use crate::sse::{frame_upstream_chunk, is_preframed, SseEvent, SseFrame, Utf8Decoder};
use crate::upstream::{UpstreamChunks, UpstreamClient};

/// Relay one prompt: open the upstream stream on first poll and re-emit it
/// as SSE frames. The result is lazy, finite and single-use; dropping it
/// drops the upstream connection.
pub fn relay_prompt(
    upstream: UpstreamClient,
    request: ChatRequest,
    request_id: Uuid,
) -> impl Stream<Item = SseFrame> + Send + 'static {
    let chunks = stream::once(async move { upstream.open_prompt_stream(&request).await })
        .flat_map(|opened| -> UpstreamChunks {
            match opened {
                Ok(chunks) => chunks,
                Err(e) => stream::once(future::ready(Err(e))).boxed(),
            }
        });

    relay_chunks(Box::pin(chunks), request_id)
}

struct RelayState<S> {
    chunks: S,
    decoder: Utf8Decoder,
    request_id: Uuid,
    chunk_count: usize,
    total_bytes: usize,
    started: Instant,
    finished: bool,
}

impl<S> Drop for RelayState<S> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                request_id = %self.request_id,
                "⚠️  Client disconnected after {} chunk(s), dropping upstream stream",
                self.chunk_count
            );
        }
    }
}

/// Transform upstream chunks into SSE frames, in arrival order.
///
/// Ends with exactly one terminal event: `done` when the upstream finishes,
/// or `error` on the first upstream failure, after which nothing else is
/// read or emitted.
pub fn relay_chunks<S>(chunks: S, request_id: Uuid) -> impl Stream<Item = SseFrame> + Send + 'static
where
    S: Stream<Item = Result<Bytes, UpstreamError>> + Send + Unpin + 'static,
{
    let state = RelayState {
        chunks,
        decoder: Utf8Decoder::new(),
        request_id,
        chunk_count: 0,
        total_bytes: 0,
        started: Instant::now(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    state.chunk_count += 1;
                    state.total_bytes += chunk.len();
                    debug!(
                        request_id = %state.request_id,
                        "📦 Chunk #{} received: {} bytes at {:?}",
                        state.chunk_count,
                        chunk.len(),
                        state.started.elapsed()
                    );

                    // Pre-framed bytes go out as received unless a split
                    // character from the previous chunk is still pending.
                    let frames = if !state.decoder.has_pending() && is_preframed(&chunk) {
                        vec![SseFrame::Passthrough(chunk)]
                    } else {
                        frame_upstream_chunk(&state.decoder.decode(&chunk))
                    };
                    if frames.is_empty() {
                        continue;
                    }
                    return Some((frames, state));
                }
                Some(Err(e)) => {
                    error!(
                        request_id = %state.request_id,
                        "❌ Upstream failed after {} chunk(s): {}",
                        state.chunk_count,
                        e
                    );
                    state.finished = true;
                    let frames = vec![SseFrame::Event(SseEvent::from_upstream_error(&e))];
                    return Some((frames, state));
                }
                None => {
                    state.finished = true;
                    let mut frames = frame_upstream_chunk(&state.decoder.finish());
                    frames.push(SseFrame::Event(SseEvent::done()));

                    info!(
                        request_id = %state.request_id,
                        "✅ Stream completed: {} chunk(s), {} bytes in {:?}",
                        state.chunk_count,
                        state.total_bytes,
                        state.started.elapsed()
                    );
                    return Some((frames, state));
                }
            }
        }
    })
    .flat_map(stream::iter)
}
