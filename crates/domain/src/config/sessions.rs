use serde::{Deserialize, Serialize};

/// `[sessions]` — persistence location and auto-compaction thresholds
/// (spec §3, §4.4 step 4a).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Per-user data directory holding `muxd.db` and transcripts.
    /// Defaults to the OS data dir (e.g. `~/.local/share/muxd` on Linux).
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Estimated-token threshold that triggers auto-compaction on the
    /// next turn.
    #[serde(default = "d_compaction_threshold")]
    pub compaction_threshold_tokens: u64,
    /// Tail messages kept verbatim after compaction, aligned to the
    /// nearest preceding user-role message.
    #[serde(default = "d_compaction_tail")]
    pub compaction_tail_messages: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            compaction_threshold_tokens: d_compaction_threshold(),
            compaction_tail_messages: d_compaction_tail(),
        }
    }
}

fn d_compaction_threshold() -> u64 {
    100_000
}
fn d_compaction_tail() -> usize {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_compaction_threshold_matches_spec() {
        assert_eq!(SessionsConfig::default().compaction_threshold_tokens, 100_000);
    }

    #[test]
    fn default_tail_is_20_messages() {
        assert_eq!(SessionsConfig::default().compaction_tail_messages, 20);
    }
}
