//! Streaming response decoder.
//!
//! [`EventStream`] consumes parsed chunk outcomes (from the SSE framing
//! layer, or any other source) and emits [`StreamEvent`]s:
//!
//! - text parts become `text-delta` events
//! - function-call parts become a `tool-call-delta` / `tool-call` pair
//!   sharing one freshly generated UUID
//! - parse failures become in-band `error` events; the stream goes on
//! - usage and finish reason are accumulated last-write-wins and emitted
//!   in exactly one trailing `finish` event, with `unknown` / NaN
//!   defaults when nothing was ever reported

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;
use pin_project_lite::pin_project;
use tracing::debug;

use crate::error::Result;
use crate::models::chunk::ResponseChunk;
use crate::models::event::{map_finish_reason, FinishReason, StreamEvent, Usage};

pin_project! {
    /// Decoder from chunk outcomes to streaming events.
    pub struct EventStream<S> {
        #[pin]
        chunks: S,
        state: DecodeState,
        pending: VecDeque<StreamEvent>,
        finished: bool,
    }
}

#[derive(Debug, Default)]
struct DecodeState {
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl<S> EventStream<S>
where
    S: Stream<Item = Result<ResponseChunk>> + Send + 'static,
{
    /// Wrap a stream of chunk outcomes.
    pub fn new(chunks: S) -> Self {
        Self {
            chunks,
            state: DecodeState::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

/// Decode one chunk, updating the accumulators.
fn decode_chunk(chunk: &ResponseChunk, state: &mut DecodeState) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    // Envelopes without the response wrapper carry nothing.
    let Some(body) = &chunk.response else {
        debug!("Skipping chunk without response payload");
        return events;
    };

    if let Some(metadata) = &body.usage_metadata {
        state.usage = Some(Usage {
            prompt_tokens: metadata.prompt_token_count.unwrap_or(0) as f64,
            completion_tokens: metadata.candidates_token_count.unwrap_or(0) as f64,
        });
    }

    // Only the first candidate is consumed.
    let Some(candidate) = body.candidates.first() else {
        return events;
    };

    if let Some(content) = &candidate.content {
        for part in &content.parts {
            if let Some(call) = &part.function_call {
                // A fresh id per occurrence, shared by the delta/call pair.
                let id = uuid::Uuid::new_v4().to_string();
                let args = serde_json::to_string(&call.args)
                    .unwrap_or_else(|_| "{}".to_string());

                events.push(StreamEvent::ToolCallDelta {
                    id: id.clone(),
                    name: call.name.clone(),
                    args: args.clone(),
                });
                events.push(StreamEvent::ToolCall {
                    id,
                    name: call.name.clone(),
                    args,
                });
            } else if let Some(text) = &part.text {
                events.push(StreamEvent::text_delta(text));
            }
        }
    }

    if let Some(reason) = candidate.finish_reason.as_deref() {
        state.finish_reason = Some(map_finish_reason(reason));
    }

    events
}

impl<S> Stream for EventStream<S>
where
    S: Stream<Item = Result<ResponseChunk>> + Send + 'static,
{
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }

            if *this.finished {
                return Poll::Ready(None);
            }

            match this.chunks.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(decode_chunk(&chunk, this.state));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(StreamEvent::error(e.to_string())));
                }
                Poll::Ready(None) => {
                    *this.finished = true;
                    this.pending.push_back(StreamEvent::finish(
                        this.state.finish_reason.unwrap_or(FinishReason::Unknown),
                        this.state.usage.unwrap_or_default(),
                    ));
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

    use crate::error::Error;

    fn chunk(json: &str) -> ResponseChunk {
        serde_json::from_str(json).unwrap()
    }

    fn decode_all(items: Vec<Result<ResponseChunk>>) -> Vec<StreamEvent> {
        futures::executor::block_on(
            EventStream::new(futures::stream::iter(items)).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_two_chunk_text_stream() {
        let events = decode_all(vec![
            Ok(chunk(
                r#"{"response":{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}}"#,
            )),
            Ok(chunk(
                r#"{"response":{"candidates":[{"content":{"parts":[{"text":"lo"}]},
                    "finishReason":"STOP"}],
                    "usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2}}}"#,
            )),
        ]);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::text_delta("Hel"));
        assert_eq!(events[1], StreamEvent::text_delta("lo"));
        match &events[2] {
            StreamEvent::Finish { reason, usage } => {
                assert_eq!(*reason, FinishReason::Stop);
                assert_eq!(usage.prompt_tokens, 3.0);
                assert_eq!(usage.completion_tokens, 2.0);
            }
            e => panic!("Expected finish, got: {:?}", e),
        }
    }

    #[test]
    fn test_empty_stream_finishes_with_defaults() {
        let events = decode_all(vec![]);

        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Finish { reason, usage } => {
                assert_eq!(*reason, FinishReason::Unknown);
                assert!(usage.is_unreported());
            }
            e => panic!("Expected finish, got: {:?}", e),
        }
    }

    #[test]
    fn test_exactly_one_finish_event() {
        let events = decode_all(vec![
            Ok(chunk(r#"{"response":{"candidates":[{"finishReason":"STOP"}]}}"#)),
            Ok(chunk(r#"{"response":{"candidates":[{"finishReason":"STOP"}]}}"#)),
        ]);

        assert_eq!(events.iter().filter(|e| e.is_finish()).count(), 1);
        assert!(events.last().unwrap().is_finish());
    }

    #[test]
    fn test_parse_failure_becomes_error_event_and_stream_continues() {
        let parse_err = serde_json::from_str::<ResponseChunk>("{broken").unwrap_err();
        let events = decode_all(vec![
            Err(Error::Json(parse_err)),
            Ok(chunk(
                r#"{"response":{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}}"#,
            )),
        ]);

        assert_eq!(events.len(), 3);
        assert!(events[0].is_error());
        assert_eq!(events[1], StreamEvent::text_delta("ok"));
        assert!(events[2].is_finish());
    }

    #[test]
    fn test_tool_call_pair_shares_fresh_id() {
        let events = decode_all(vec![
            Ok(chunk(
                r#"{"response":{"candidates":[{"content":{"parts":[
                    {"functionCall":{"name":"lookup","args":{"q":"a"}}},
                    {"functionCall":{"name":"lookup","args":{"q":"b"}}}
                ]}}]}}"#,
            )),
        ]);

        // delta+call per occurrence, then finish
        assert_eq!(events.len(), 5);
        let (first_delta_id, first_call_id) = match (&events[0], &events[1]) {
            (
                StreamEvent::ToolCallDelta { id: d, name, args },
                StreamEvent::ToolCall { id: c, .. },
            ) => {
                assert_eq!(name, "lookup");
                assert_eq!(args, r#"{"q":"a"}"#);
                (d.clone(), c.clone())
            }
            other => panic!("Expected tool pair, got: {:?}", other),
        };
        assert_eq!(first_delta_id, first_call_id);

        let second_id = match &events[2] {
            StreamEvent::ToolCallDelta { id, .. } => id.clone(),
            e => panic!("Expected tool delta, got: {:?}", e),
        };
        // Each occurrence gets a fresh id.
        assert_ne!(first_delta_id, second_id);
    }

    #[test]
    fn test_last_write_wins_for_usage_and_finish_reason() {
        let events = decode_all(vec![
            Ok(chunk(
                r#"{"response":{"candidates":[{"finishReason":"MAX_TOKENS"}],
                    "usageMetadata":{"promptTokenCount":1,"candidatesTokenCount":1}}}"#,
            )),
            Ok(chunk(
                r#"{"response":{"candidates":[{"finishReason":"STOP"}],
                    "usageMetadata":{"promptTokenCount":10,"candidatesTokenCount":20}}}"#,
            )),
        ]);

        match &events[0] {
            StreamEvent::Finish { reason, usage } => {
                assert_eq!(*reason, FinishReason::Stop);
                assert_eq!(usage.prompt_tokens, 10.0);
                assert_eq!(usage.completion_tokens, 20.0);
            }
            e => panic!("Expected finish, got: {:?}", e),
        }
    }

    #[test]
    fn test_missing_usage_fields_default_to_zero_on_overwrite() {
        let events = decode_all(vec![Ok(chunk(
            r#"{"response":{"usageMetadata":{"promptTokenCount":7}}}"#,
        ))]);

        match &events[0] {
            StreamEvent::Finish { usage, .. } => {
                assert_eq!(usage.prompt_tokens, 7.0);
                assert_eq!(usage.completion_tokens, 0.0);
            }
            e => panic!("Expected finish, got: {:?}", e),
        }
    }

    #[test]
    fn test_chunk_without_wrapper_is_skipped() {
        let events = decode_all(vec![Ok(chunk(r#"{"candidates":[]}"#))]);

        assert_eq!(events.len(), 1);
        assert!(events[0].is_finish());
    }

    #[test]
    fn test_only_first_candidate_is_decoded() {
        let events = decode_all(vec![Ok(chunk(
            r#"{"response":{"candidates":[
                {"content":{"parts":[{"text":"first"}]}},
                {"content":{"parts":[{"text":"second"}]}}
            ]}}"#,
        ))]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::text_delta("first"));
        assert!(events[1].is_finish());
    }

    #[test]
    fn test_empty_text_part_still_emits_delta() {
        let events = decode_all(vec![Ok(chunk(
            r#"{"response":{"candidates":[{"content":{"parts":[{"text":""}]}}]}}"#,
        ))]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::text_delta(""));
        assert!(events[1].is_finish());
    }
}
