//! Wire-format types for Code Assist generation responses.
//!
//! Code Assist wraps the familiar `candidates` / `usageMetadata` shape in
//! an outer `response` envelope, both for streaming chunks and for
//! non-streaming calls.

use serde::Deserialize;

/// One envelope from the API: a streaming chunk or a full response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseChunk {
    /// The wrapped payload. Envelopes without it carry nothing useful
    /// and are skipped by the decoder.
    #[serde(default)]
    pub response: Option<ResponseBody>,
}

/// The payload inside the `response` wrapper.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    /// Generation candidates; only the first is consumed.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Token accounting, typically only on the final chunk.
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

/// A single generation candidate.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// The candidate's content.
    #[serde(default)]
    pub content: Option<Content>,
    /// Why generation stopped, on the final chunk.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Content of a candidate.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// Author role, normally `model`.
    #[serde(default)]
    pub role: Option<String>,
    /// Ordered content parts.
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One content part: text or a function call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text fragment.
    #[serde(default)]
    pub text: Option<String>,
    /// Function call request.
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
}

/// A function call emitted by the model.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Arguments as structured JSON.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Token accounting reported by the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_token_count: Option<u32>,
    /// Tokens in the candidates.
    #[serde(default)]
    pub candidates_token_count: Option<u32>,
    /// Total tokens.
    #[serde(default)]
    pub total_token_count: Option<u32>,
}
