//! Server-Sent Events framing.
//!
//! Code Assist streams responses as SSE:
//!
//! ```text
//! data: {"response": {"candidates": [...]}}
//!
//! data: {"response": {"candidates": [...], "usageMetadata": {...}}}
//!
//! data: [DONE]
//! ```
//!
//! [`SseStream`] splits the byte stream into `data:` payloads and parses
//! each one, yielding one parse outcome per payload. Parse failures are
//! yielded as items rather than swallowed, so the decoder downstream can
//! surface them in-band.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;
use pin_project_lite::pin_project;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::chunk::ResponseChunk;

pin_project! {
    /// SSE framing layer: bytes in, parsed chunk outcomes out.
    pub struct SseStream<S> {
        #[pin]
        byte_stream: S,
        buffer: String,
        pending: VecDeque<Result<ResponseChunk>>,
        done: bool,
    }
}

impl<S> SseStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    /// Wrap a byte stream.
    pub fn new(byte_stream: S) -> Self {
        Self {
            byte_stream,
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

/// Process a single SSE line, returning an item for `data:` payloads.
fn process_sse_line(line: &str, done: &mut bool) -> Option<Result<ResponseChunk>> {
    let line = line.trim();

    // Skip blanks, comments, and non-data fields.
    if line.is_empty() || line.starts_with(':') || !line.starts_with("data:") {
        return None;
    }

    let payload = line[5..].trim();

    if payload == "[DONE]" {
        *done = true;
        return None;
    }

    if payload.is_empty() || *done {
        return None;
    }

    match serde_json::from_str::<ResponseChunk>(payload) {
        Ok(chunk) => Some(Ok(chunk)),
        Err(e) => {
            debug!(
                error = %e,
                payload = %payload.chars().take(100).collect::<String>(),
                "Unparseable SSE payload"
            );
            Some(Err(Error::Json(e)))
        }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    type Item = Result<ResponseChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }

            match this.byte_stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.push_str(&String::from_utf8_lossy(&bytes));

                    while let Some(newline_pos) = this.buffer.find('\n') {
                        let line = this.buffer[..newline_pos].to_string();
                        *this.buffer = this.buffer[newline_pos + 1..].to_string();

                        if let Some(item) = process_sse_line(&line, this.done) {
                            this.pending.push_back(item);
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(Error::from(e))));
                }
                Poll::Ready(None) => {
                    if !this.buffer.is_empty() {
                        let line = std::mem::take(this.buffer);
                        if let Some(item) = process_sse_line(&line, this.done) {
                            this.pending.push_back(item);
                        }
                    }
                    return Poll::Ready(this.pending.pop_front());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn byte_stream(
        chunks: Vec<&'static str>,
    ) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static {
        futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes()))),
        )
    }

    #[test]
    fn test_process_line_skips_noise() {
        let mut done = false;
        assert!(process_sse_line("", &mut done).is_none());
        assert!(process_sse_line(": keep-alive", &mut done).is_none());
        assert!(process_sse_line("event: message", &mut done).is_none());
        assert!(process_sse_line("data:", &mut done).is_none());
    }

    #[test]
    fn test_process_line_done_sentinel() {
        let mut done = false;
        assert!(process_sse_line("data: [DONE]", &mut done).is_none());
        assert!(done);
        // Data after the sentinel is ignored.
        assert!(process_sse_line(r#"data: {"response":{}}"#, &mut done).is_none());
    }

    #[test]
    fn test_process_line_parse_failure_is_an_item() {
        let mut done = false;
        let item = process_sse_line("data: {broken", &mut done).unwrap();
        assert!(matches!(item, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_stream_reassembles_split_lines() {
        // One payload split across two byte chunks.
        let stream = SseStream::new(byte_stream(vec![
            "data: {\"response\":{\"candidates\":[{\"content\":",
            "{\"parts\":[{\"text\":\"Hi\"}]}}]}}\n\n",
        ]));
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 1);
        let chunk = items[0].as_ref().unwrap();
        let body = chunk.response.as_ref().unwrap();
        assert_eq!(
            body.candidates[0].content.as_ref().unwrap().parts[0]
                .text
                .as_deref(),
            Some("Hi")
        );
    }

    #[tokio::test]
    async fn test_stream_flushes_trailing_line_without_newline() {
        let stream = SseStream::new(byte_stream(vec![
            "data: {\"response\":{\"candidates\":[]}}",
        ]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[tokio::test]
    async fn test_stream_mixed_payloads() {
        let stream = SseStream::new(byte_stream(vec![
            ": comment\ndata: {\"response\":{}}\n\ndata: {nope}\n\ndata: [DONE]\n",
        ]));
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
