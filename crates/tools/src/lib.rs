//! The Tool registry: the contract the Agent Loop calls through to run a
//! tool, the in-memory registry of what's currently callable, and a
//! couple of stub built-ins to exercise both.
//!
//! Real tool implementations — file I/O, shell exec, web search — are
//! external collaborators and live outside this crate; MCP servers
//! register their tool definitions here dynamically via
//! [`registry::ToolRegistry::register_mcp`].

pub mod builtins;
pub mod registry;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolOutput};
