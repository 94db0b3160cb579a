//! Minimal built-in tools that exercise the registry contract without any
//! real I/O. Real file/exec/search tools are external to this crate —
//! these two exist only so the registry, profile gating, and the Agent
//! Loop's tool-dispatch path have something safe to call in tests.

use muxd_domain::tool::RiskTag;
use serde_json::Value;

use crate::tool::{Tool, ToolContext, ToolOutput};

/// Echoes its `text` input back unchanged. Carries no risk tags, so every
/// profile allows it.
pub struct TextEchoTool;

#[async_trait::async_trait]
impl Tool for TextEchoTool {
    fn name(&self) -> &str {
        "text_echo"
    }

    fn display_name(&self) -> &str {
        "Echo"
    }

    fn description(&self) -> &str {
        "Echoes the given text back. Useful for verifying tool wiring."
    }

    fn json_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
        })
    }

    fn risk_tags(&self) -> &[RiskTag] {
        &[]
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> ToolOutput {
        match input.get("text").and_then(|v| v.as_str()) {
            Some(text) => ToolOutput::ok(text),
            None => ToolOutput::error("missing required field 'text'"),
        }
    }
}

/// Suspends the turn to ask the human a question. The Agent Loop
/// recognizes this tool by name and short-circuits the turn into
/// `ask_user` suspension rather than actually invoking `execute` —
/// this implementation exists for completeness and for tests that
/// exercise the registry directly.
pub struct AskUserTool;

#[async_trait::async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn display_name(&self) -> &str {
        "Ask User"
    }

    fn description(&self) -> &str {
        "Pauses the turn and asks the human a clarifying question."
    }

    fn json_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"question": {"type": "string"}},
            "required": ["question"],
        })
    }

    fn risk_tags(&self) -> &[RiskTag] {
        &[]
    }

    async fn execute(&self, _input: Value, _context: &ToolContext) -> ToolOutput {
        ToolOutput::error("ask_user must be intercepted by the Agent Loop before execution")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext { session_id: "s1".into(), workspace_root: std::env::temp_dir() }
    }

    #[tokio::test]
    async fn text_echo_returns_input_text() {
        let out = TextEchoTool.execute(serde_json::json!({"text": "hello"}), &ctx()).await;
        assert_eq!(out.text, "hello");
        assert!(!out.is_error);
    }

    #[tokio::test]
    async fn text_echo_errors_on_missing_field() {
        let out = TextEchoTool.execute(serde_json::json!({}), &ctx()).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn ask_user_direct_execution_is_an_error() {
        let out = AskUserTool.execute(serde_json::json!({"question": "?"}), &ctx()).await;
        assert!(out.is_error);
    }

    #[test]
    fn neither_builtin_carries_risk_tags() {
        assert!(TextEchoTool.risk_tags().is_empty());
        assert!(AskUserTool.risk_tags().is_empty());
    }
}
