//! Provider-facing message shape, tool definitions, risk tags, and the
//! built-in profile sets that gate which tools a turn is allowed to
//! invoke.
//!
//! This is the wire shape handed to `Provider::stream` — distinct from
//! the Store's persisted [`crate::message::Message`], which additionally
//! carries a session id and sequence number. The Agent Loop converts one
//! into the other when assembling a prompt.

use serde::{Deserialize, Serialize};

/// A single in-flight or completed tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// The schema a tool advertises to the Provider's `tools` parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub json_schema: serde_json::Value,
    #[serde(default)]
    pub risk_tags: Vec<RiskTag>,
}

/// `risk_tags ⊆ {fs_write, exec, net, irreversible}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTag {
    FsWrite,
    Exec,
    Net,
    Irreversible,
}

/// A named disabled-tool set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Blocks fs_write + exec + irreversible.
    #[default]
    Safe,
    /// Allows everything but irreversible.
    Coder,
    /// Allows net + read, blocks fs_write + exec.
    Research,
}

impl Profile {
    /// Risk tags this profile denies. A tool is blocked if any of its
    /// `risk_tags` intersects this set.
    pub fn denied_tags(self) -> &'static [RiskTag] {
        match self {
            Profile::Safe => &[RiskTag::FsWrite, RiskTag::Exec, RiskTag::Irreversible],
            Profile::Coder => &[RiskTag::Irreversible],
            Profile::Research => &[RiskTag::FsWrite, RiskTag::Exec],
        }
    }

    pub fn allows(self, tool: &ToolDefinition) -> bool {
        let denied = self.denied_tags();
        !tool.risk_tags.iter().any(|t| denied.contains(t))
    }
}

/// A message in the prompt sent to a Provider (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self { role: Role::User, content: MessageContent::Parts(parts) }
    }
    pub fn assistant_parts(parts: Vec<ContentPart>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Parts(parts) }
    }
}

impl MessageContent {
    /// Extract and join all text content, returning an owned String.
    /// Non-text parts (tool_use, tool_result) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(tags: &[RiskTag]) -> ToolDefinition {
        ToolDefinition {
            name: "t".into(),
            display_name: "T".into(),
            description: "".into(),
            json_schema: serde_json::json!({}),
            risk_tags: tags.to_vec(),
        }
    }

    #[test]
    fn safe_profile_blocks_fs_write_exec_irreversible() {
        assert!(!Profile::Safe.allows(&tool(&[RiskTag::FsWrite])));
        assert!(!Profile::Safe.allows(&tool(&[RiskTag::Exec])));
        assert!(!Profile::Safe.allows(&tool(&[RiskTag::Irreversible])));
        assert!(Profile::Safe.allows(&tool(&[RiskTag::Net])));
        assert!(Profile::Safe.allows(&tool(&[])));
    }

    #[test]
    fn coder_profile_allows_all_but_irreversible() {
        assert!(Profile::Coder.allows(&tool(&[RiskTag::FsWrite])));
        assert!(Profile::Coder.allows(&tool(&[RiskTag::Exec])));
        assert!(Profile::Coder.allows(&tool(&[RiskTag::Net])));
        assert!(!Profile::Coder.allows(&tool(&[RiskTag::Irreversible])));
    }

    #[test]
    fn research_profile_allows_net_blocks_fs_write_and_exec() {
        assert!(Profile::Research.allows(&tool(&[RiskTag::Net])));
        assert!(!Profile::Research.allows(&tool(&[RiskTag::FsWrite])));
        assert!(!Profile::Research.allows(&tool(&[RiskTag::Exec])));
    }

    #[test]
    fn tool_with_multiple_tags_blocked_if_any_denied() {
        assert!(!Profile::Research.allows(&tool(&[RiskTag::Net, RiskTag::Exec])));
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "line one".into() },
            ContentPart::ToolUse { id: "c1".into(), name: "exec".into(), input: serde_json::json!({}) },
            ContentPart::Text { text: "line two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn extract_all_text_empty_parts() {
        let content = MessageContent::Parts(vec![]);
        assert_eq!(content.extract_all_text(), "");
    }
}
