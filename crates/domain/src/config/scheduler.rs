use serde::{Deserialize, Serialize};

/// `[scheduler]` — ticker cadence and the tool allow-list jobs may
/// invoke (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ticker interval in seconds.
    #[serde(default = "d_tick_sec")]
    pub tick_interval_sec: u64,
    /// Max due jobs polled per tick.
    #[serde(default = "d_batch")]
    pub batch_size: u32,
    /// Tool names explicitly permitted despite carrying a denied risk
    /// tag. The default allow-list excludes all `irreversible`/`exec`/
    /// `fs_write` tools.
    #[serde(default)]
    pub allow_list: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_sec: d_tick_sec(),
            batch_size: d_batch(),
            allow_list: Vec::new(),
        }
    }
}

fn d_tick_sec() -> u64 {
    10
}
fn d_batch() -> u32 {
    50
}
