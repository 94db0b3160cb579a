use crate::tool::Profile;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which tools a turn may invoke, per spec §4.3. Tool *implementations*
/// are out of scope here — this only configures the registry/profile
/// gate the Agent Loop consults before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Built-in profile; a tool is available only if `profile.allows(tool)`
    /// and its name is not in `disabled_tools`.
    #[serde(default)]
    pub profile: Profile,
    /// Explicit per-name overrides on top of the profile, sorted and
    /// comma-joined when surfaced to the model as denied-tool context.
    #[serde(default)]
    pub disabled_tools: Vec<String>,
    /// Default per-tool execution timeout (ms) when a tool doesn't
    /// specify its own.
    #[serde(default = "d_default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            disabled_tools: Vec::new(),
            default_timeout_ms: d_default_timeout_ms(),
        }
    }
}

impl ToolsConfig {
    /// Sorted, comma-joined, for stable display/logging.
    pub fn disabled_tools_sorted(&self) -> Vec<String> {
        let mut v = self.disabled_tools.clone();
        v.sort();
        v
    }
}

fn d_default_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{RiskTag, ToolDefinition};

    #[test]
    fn default_profile_is_safe() {
        assert_eq!(ToolsConfig::default().profile, Profile::Safe);
    }

    #[test]
    fn disabled_tools_sorted_stable() {
        let cfg = ToolsConfig { disabled_tools: vec!["z".into(), "a".into()], ..ToolsConfig::default() };
        assert_eq!(cfg.disabled_tools_sorted(), vec!["a".to_string(), "z".to_string()]);
    }

    #[test]
    fn coder_profile_allows_fs_write_tool() {
        let cfg = ToolsConfig { profile: Profile::Coder, ..ToolsConfig::default() };
        let tool = ToolDefinition {
            name: "write_file".into(),
            display_name: "Write File".into(),
            description: "".into(),
            json_schema: serde_json::json!({}),
            risk_tags: vec![RiskTag::FsWrite],
        };
        assert!(cfg.profile.allows(&tool));
    }
}
