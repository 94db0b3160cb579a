use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for Provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events yielded by `Provider::stream` (provider-agnostic; see spec §4.2).
///
/// The Agent Loop consumes these and re-emits a superset as SSE events to
/// subscribers (adding `turn_start`/`turn_done`/`tool_start`/`tool_done`/
/// `retrying`/`compacted`/`titled`, which are loop-level, not
/// provider-level).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    /// A text token chunk.
    #[serde(rename = "delta")]
    Delta { text: String },

    /// A tool call has started.
    #[serde(rename = "tool_use_start")]
    ToolUseStart { id: String, name: String },

    /// Incremental tool call argument JSON fragment.
    #[serde(rename = "tool_use_input")]
    ToolUseInput { id: String, json_fragment: String },

    /// A tool call's arguments are fully streamed.
    #[serde(rename = "tool_use_end")]
    ToolUseEnd { id: String },

    /// The model stopped generating.
    #[serde(rename = "stop")]
    Stop {
        reason: StopReason,
        in_tokens: u32,
        out_tokens: u32,
        #[serde(default)]
        cache_create: u32,
        #[serde(default)]
        cache_read: u32,
    },

    /// A terminal error for this stream.
    #[serde(rename = "error")]
    Error {
        kind: ProviderErrorKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    RateLimit,
    Canceled,
    Other,
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
