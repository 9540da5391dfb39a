//! Data types: the API's wire format and the decoded event stream.

pub mod chunk;
pub mod event;

pub use chunk::{Candidate, Content, FunctionCall, Part, ResponseBody, ResponseChunk, UsageMetadata};
pub use event::{map_finish_reason, FinishReason, StreamEvent, Usage};
