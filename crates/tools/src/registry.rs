//! In-memory tool registry.
//!
//! Holds every tool name the Agent Loop may offer a model: built-ins
//! registered at startup plus MCP tools registered dynamically once an
//! external MCP server's tool list is known. Profile and disabled-tool
//! filtering happen here so the Agent Loop only ever sees the subset a
//! turn is actually allowed to call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use muxd_domain::config::ToolsConfig;
use muxd_domain::error::{Error, Result};
use muxd_domain::tool::{Profile, ToolDefinition};

use crate::tool::{Tool, ToolContext, ToolOutput};

/// A registered tool: either a local implementation this process can run
/// directly, or an MCP-advertised definition whose execution is routed
/// to the external MCP server that owns it.
enum Entry {
    Local(Arc<dyn Tool>),
    Mcp(ToolDefinition),
}

impl Entry {
    fn definition(&self) -> ToolDefinition {
        match self {
            Entry::Local(t) => t.definition(),
            Entry::Mcp(def) => def.clone(),
        }
    }
}

pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Register a built-in tool. Later registrations under the same name
    /// replace earlier ones.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, "registered built-in tool");
        self.entries.write().insert(name, Entry::Local(tool));
    }

    /// Register (or refresh) an MCP tool's definition without a local
    /// executor. Called when an MCP server's tool list is fetched or
    /// changes.
    pub fn register_mcp(&self, definition: ToolDefinition) {
        tracing::debug!(tool = %definition.name, "registered mcp tool");
        self.entries.write().insert(definition.name.clone(), Entry::Mcp(definition));
    }

    /// Drop every MCP-sourced tool, e.g. when its server disconnects.
    /// Local tools are untouched.
    pub fn clear_mcp(&self) {
        self.entries.write().retain(|_, e| matches!(e, Entry::Local(_)));
    }

    pub fn unregister(&self, name: &str) {
        self.entries.write().remove(name);
    }

    /// Definitions visible to a turn: filtered by `profile` and the
    /// config's `disabled_tools` list.
    pub fn definitions_for(&self, profile: Profile, config: &ToolsConfig) -> Vec<ToolDefinition> {
        self.entries
            .read()
            .values()
            .map(Entry::definition)
            .filter(|def| !config.disabled_tools.contains(&def.name))
            .filter(|def| profile.allows(def))
            .collect()
    }

    /// Look up a single tool's wire definition (including its risk tags)
    /// regardless of profile — used by callers like the Scheduler that
    /// apply their own allow-list policy rather than a `Profile`.
    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.entries.read().get(name).map(Entry::definition)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Whether `name` is callable under `profile`/`config` right now —
    /// the gate the Agent Loop checks before dispatching a model-issued
    /// tool call, since the model may have been trained on a larger tool
    /// set than the one it was actually offered this turn.
    pub fn is_allowed(&self, name: &str, profile: Profile, config: &ToolsConfig) -> bool {
        if config.disabled_tools.contains(&name.to_string()) {
            return false;
        }
        match self.entries.read().get(name) {
            Some(entry) => profile.allows(&entry.definition()),
            None => false,
        }
    }

    pub async fn execute(&self, name: &str, input: serde_json::Value, context: &ToolContext) -> Result<ToolOutput> {
        let entry = {
            let entries = self.entries.read();
            match entries.get(name) {
                Some(Entry::Local(tool)) => Some(EntryRef::Local(tool.clone())),
                Some(Entry::Mcp(_)) => Some(EntryRef::Mcp),
                None => None,
            }
        };

        match entry {
            Some(EntryRef::Local(tool)) => Ok(tool.execute(input, context).await),
            Some(EntryRef::Mcp) => Err(Error::NotFound(format!(
                "tool '{name}' is MCP-registered; execution must be routed through the owning MCP client"
            ))),
            None => Err(Error::NotFound(format!("tool '{name}' is not registered"))),
        }
    }
}

/// Owned snapshot of what kind of entry was found, so the read lock can
/// be dropped before the (possibly long-running) execute call.
enum EntryRef {
    Local(Arc<dyn Tool>),
    Mcp,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
