//! Per-user data directory resolution (spec §6 "Environment / paths").
//!
//! `muxd.db`, transcripts, `schedule.json`, and `daemon.lock` all live
//! under one directory: `[sessions].data_dir` if configured, otherwise the
//! OS data dir (e.g. `~/.local/share/muxd` on Linux, `~/Library/Application
//! Support/muxd` on macOS).

use std::path::PathBuf;

pub fn data_dir(configured: &Option<String>) -> PathBuf {
    match configured {
        Some(p) => PathBuf::from(p),
        None => dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("muxd"),
    }
}

pub fn lockfile_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("daemon.lock")
}

pub fn runtime_log_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("logs").join("runtime.log")
}
