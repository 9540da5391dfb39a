//! Streaming transport: SSE framing and event decoding.

pub mod decode;
pub mod sse;

pub use decode::EventStream;
pub use sse::SseStream;
