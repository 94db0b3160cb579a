//! The `Tool` trait — the contract every built-in or MCP-registered tool
//! implements.
//!
//! Tool implementations themselves (real file I/O, shell exec, web search)
//! are external to this crate; what lives here is the contract the Agent
//! Loop calls through, plus the handful of stub tools that exercise it.

use muxd_domain::tool::{RiskTag, ToolDefinition};
use serde_json::Value;

/// Context handed to a tool at execution time. Carries the caller's
/// session affiliation and the workspace root a tool should scope
/// filesystem access to, without this crate knowing how any given tool
/// uses them.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub workspace_root: std::path::PathBuf,
}

/// Result of running a tool: the text fed back to the model, and whether
/// it represents an error (surfaced to the model as `is_error` on the
/// resulting `tool_result` content block).
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: false }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_error: true }
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;
    fn description(&self) -> &str;
    fn json_schema(&self) -> Value;
    fn risk_tags(&self) -> &[RiskTag];

    async fn execute(&self, input: Value, context: &ToolContext) -> ToolOutput;

    /// The wire-shape definition handed to `Provider::stream`'s `tools`
    /// parameter.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            display_name: self.display_name().to_string(),
            description: self.description().to_string(),
            json_schema: self.json_schema(),
            risk_tags: self.risk_tags().to_vec(),
        }
    }
}
