//! Decoded streaming events.
//!
//! The decoder turns raw response chunks into a flat sequence of events:
//! text deltas, tool calls, in-band errors, and exactly one trailing
//! finish event carrying the accumulated finish reason and usage.

use serde::Serialize;

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Hit the output token limit.
    Length,
    /// Blocked by safety or recitation filters.
    ContentFilter,
    /// Stopped for another explicit reason.
    Other,
    /// No finish reason was reported, or it was unrecognized.
    Unknown,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ContentFilter => write!(f, "content-filter"),
            FinishReason::Other => write!(f, "other"),
            FinishReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Map the API's finish reason string to a [`FinishReason`].
pub fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
        "OTHER" => FinishReason::Other,
        _ => FinishReason::Unknown,
    }
}

/// Token usage attached to the finish event.
///
/// Counts are floats because NaN is the "never reported" sentinel: a
/// stream that carried no `usageMetadata` finishes with NaN counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: f64,
    /// Tokens in the completion.
    pub completion_tokens: f64,
}

impl Usage {
    /// Usage that was never reported.
    pub fn unreported() -> Self {
        Self {
            prompt_tokens: f64::NAN,
            completion_tokens: f64::NAN,
        }
    }

    /// True when neither count was ever reported.
    pub fn is_unreported(&self) -> bool {
        self.prompt_tokens.is_nan() && self.completion_tokens.is_nan()
    }
}

impl Default for Usage {
    fn default() -> Self {
        Self::unreported()
    }
}

/// One decoded streaming event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// A fragment of model text.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// Incremental view of a tool call's arguments.
    ToolCallDelta {
        /// Id shared with the paired [`StreamEvent::ToolCall`].
        id: String,
        /// Tool name.
        name: String,
        /// Argument fragment, JSON-encoded.
        args: String,
    },
    /// A complete tool call.
    ToolCall {
        /// Id shared with the paired [`StreamEvent::ToolCallDelta`].
        id: String,
        /// Tool name.
        name: String,
        /// Arguments, JSON-encoded.
        args: String,
    },
    /// An in-band failure; the stream continues afterwards.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Stream end, emitted exactly once.
    Finish {
        /// Accumulated finish reason.
        reason: FinishReason,
        /// Accumulated usage.
        usage: Usage,
    },
}

impl StreamEvent {
    /// Create a text delta event.
    pub fn text_delta(text: impl Into<String>) -> Self {
        StreamEvent::TextDelta { text: text.into() }
    }

    /// Create an error event.
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// Create a finish event.
    pub fn finish(reason: FinishReason, usage: Usage) -> Self {
        StreamEvent::Finish { reason, usage }
    }

    /// True for [`StreamEvent::Finish`].
    pub fn is_finish(&self) -> bool {
        matches!(self, StreamEvent::Finish { .. })
    }

    /// True for [`StreamEvent::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }
}
