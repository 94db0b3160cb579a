//! Shared server state, handed to every Axum handler via `State<AppState>`.

use std::sync::Arc;

use muxd_domain::config::Config;
use muxd_providers::registry::ProviderRegistry;
use muxd_store::{ScheduleStore, SessionStore};
use muxd_tools::ToolRegistry;

use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::sse_hub::SseHub;
use crate::runtime::turn::AskRegistry;

/// Shared application state passed to all API handlers and background
/// tasks. Cheap to clone — every field is an `Arc` (or a `Vec`/`PathBuf`
/// computed once at startup).
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,

    // ── Durable stores ───────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub schedules: Arc<ScheduleStore>,

    // ── Tool dispatch ─────────────────────────────────────────────────
    pub tools: Arc<ToolRegistry>,

    // ── Turn concurrency & suspension ────────────────────────────────
    /// At-most-one-turn-per-session (spec §4.4, §5).
    pub session_locks: Arc<SessionLockMap>,
    /// Per-session cancellation signal checked by the Agent Loop.
    pub cancel_map: Arc<CancelMap>,
    /// Pending `ask_user` suspensions awaiting a client response.
    pub asks: Arc<AskRegistry>,
    /// Per-session SSE fan-out for live turns (spec §4.5).
    pub sse_hub: Arc<SseHub>,

    // ── Security (startup-computed) ──────────────────────────────────
    /// SHA-256 digest of the Lockfile's bearer token.
    pub api_token_hash: Arc<Vec<u8>>,
    /// The plaintext Lockfile token, kept only to render the `/qrcode`
    /// pairing payload — never compared against directly (see `api::auth`).
    pub connection_token: Arc<String>,
    /// `(bind_address, port)` actually bound, echoed into `/qrcode`.
    pub bound_addr: (String, u16),

    /// Workspace root tools are scoped to (spec §4.3 `ToolContext`).
    pub workspace_root: std::path::PathBuf,
    /// Where `config.toml` was loaded from; `POST /config` writes back here.
    pub config_path: std::path::PathBuf,
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use muxd_domain::config::Config;
    use sha2::{Digest, Sha256};

    /// Builds a fully-wired `AppState` backed by a throwaway temp directory,
    /// for tests that need the real shape (middleware, handlers) without a
    /// live daemon around it. The returned `TempDir` must stay alive for as
    /// long as the `AppState` is used; it removes the directory on drop.
    pub fn fixture_with_token(token: &str) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        let config = Config::default();

        let state = AppState {
            llm: Arc::new(ProviderRegistry::from_config(&config.llm).unwrap()),
            sessions: Arc::new(SessionStore::open(&data_dir).unwrap()),
            schedules: Arc::new(ScheduleStore::open(&data_dir).unwrap()),
            tools: Arc::new(ToolRegistry::new()),
            session_locks: Arc::new(SessionLockMap::new()),
            cancel_map: Arc::new(CancelMap::new()),
            asks: Arc::new(AskRegistry::new()),
            sse_hub: Arc::new(SseHub::new()),
            api_token_hash: Arc::new(Sha256::digest(token.as_bytes()).to_vec()),
            connection_token: Arc::new(token.to_owned()),
            bound_addr: ("127.0.0.1".to_owned(), 4096),
            workspace_root: data_dir.clone(),
            config_path: data_dir.join("config.toml"),
            config: Arc::new(config),
        };
        (dir, state)
    }
}
