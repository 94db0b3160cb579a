//! Core conversation domain types: sessions, messages, content blocks,
//! compactions, and scheduled tool jobs.
//!
//! `ContentBlock` is a tagged variant, not an inheritance hierarchy — see
//! the Anthropic-compatible `tool_use`/`tool_result` pairing invariant
//! enforced by the Agent Loop's dangling-tool-use repair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable conversation container with ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_path: String,
    pub title: String,
    pub model: Option<String>,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub branch_point: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(project_path: String, model: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_path,
            title: "New Session".to_owned(),
            model,
            total_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            message_count: 0,
            parent_session_id: None,
            branch_point: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// `role ∈ {user, assistant, system}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A typed fragment of a message: text, tool_use, or tool_result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse {
        tool_use_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
        #[serde(default)]
        caller_type: Option<String>,
        #[serde(default)]
        caller_tool_id: Option<String>,
    },
    ToolResult {
        tool_use_id: String,
        tool_result: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(tool_use_id: impl Into<String>, tool_name: impl Into<String>, tool_input: serde_json::Value) -> Self {
        ContentBlock::ToolUse {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            tool_input,
            caller_type: None,
            caller_tool_id: None,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, tool_result: impl Into<String>, is_error: bool) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            tool_result: tool_result.into(),
            is_error,
        }
    }

    pub fn as_tool_use_id(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolUse { tool_use_id, .. } => Some(tool_use_id),
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            ContentBlock::Text { .. } => None,
        }
    }
}

/// `content_type ∈ {text, blocks}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { content: String },
    Blocks { content: Vec<ContentBlock> },
}

impl MessageContent {
    /// Flat-text projection: concatenation of `text` blocks joined by
    /// newline, or the content itself when already plain text.
    pub fn flat_text(&self) -> String {
        match self {
            MessageContent::Text { content } => content.clone(),
            MessageContent::Blocks { content } => content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn blocks(&self) -> Option<&[ContentBlock]> {
        match self {
            MessageContent::Blocks { content } => Some(content),
            MessageContent::Text { .. } => None,
        }
    }
}

/// `(id, session_id, role, content, content_type, tokens, sequence)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    #[serde(flatten)]
    pub content: MessageContent,
    #[serde(default)]
    pub tokens: u64,
    pub sequence: u64,
}

impl Message {
    pub fn new_text(session_id: &str, role: Role, text: impl Into<String>, tokens: u64, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role,
            content: MessageContent::Text { content: text.into() },
            tokens,
            sequence,
        }
    }

    pub fn new_blocks(session_id: &str, role: Role, blocks: Vec<ContentBlock>, tokens: u64, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            role,
            content: MessageContent::Blocks { content: blocks },
            tokens,
            sequence,
        }
    }

    /// Tool-use ids present as the leading blocks produced by an assistant
    /// message, used by the dangling-tool-use repair pass.
    pub fn tool_use_ids(&self) -> Vec<String> {
        match self.content.blocks() {
            Some(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { tool_use_id, .. } => Some(tool_use_id.clone()),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Tool-result ids answered by a user message, used by the same pass.
    pub fn tool_result_ids(&self) -> Vec<String> {
        match self.content.blocks() {
            Some(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
        }
    }
}

/// A persisted summary of early messages, superseding them above a
/// sequence cutoff when assembling the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compaction {
    pub id: String,
    pub session_id: String,
    pub summary_text: String,
    pub cutoff_sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl Compaction {
    pub fn new(session_id: &str, summary_text: String, cutoff_sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            summary_text,
            cutoff_sequence,
            created_at: Utc::now(),
        }
    }
}

/// `recurrence ∈ {once, hourly, daily}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Once,
    Hourly,
    Daily,
}

impl Recurrence {
    /// The fixed interval to advance `scheduled_for` by on success, or
    /// `None` for `once` (which never re-fires).
    pub fn period(self) -> Option<chrono::Duration> {
        match self {
            Recurrence::Once => None,
            Recurrence::Hourly => Some(chrono::Duration::hours(1)),
            Recurrence::Daily => Some(chrono::Duration::hours(24)),
        }
    }
}

/// `status ∈ {pending, completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Bound applied to `last_error`/`last_result` so a runaway tool output
/// cannot blow up the job's on-disk row.
pub const LAST_ERROR_MAX_BYTES: usize = 2 * 1024;
pub const LAST_RESULT_MAX_BYTES: usize = 4 * 1024;

/// A durable one-shot or recurring tool invocation.
///
/// The scheduler mutates only `status`, `attempt_count`, `last_*`,
/// `completed_at`, and (for recurring jobs) `scheduled_for`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledToolJob {
    pub id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub scheduled_for: DateTime<Utc>,
    pub recurrence: Recurrence,
    pub status: JobStatus,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledToolJob {
    pub fn new(tool_name: String, tool_input: serde_json::Value, scheduled_for: DateTime<Utc>, recurrence: Recurrence) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name,
            tool_input,
            scheduled_for,
            recurrence,
            status: JobStatus::Pending,
            attempt_count: 0,
            last_error: None,
            last_result: None,
            last_attempt_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Truncate a string to at most `max_bytes`, respecting UTF-8 char
/// boundaries (never split a multi-byte codepoint).
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_owned()
}
