//! `AppState` construction and background-task spawning, factored out of
//! `main.rs` so the CLI's `serve` and `doctor` paths can share it.

use std::sync::Arc;

use anyhow::Context;
use muxd_domain::config::{Config, ConfigSeverity};
use muxd_providers::registry::ProviderRegistry;
use muxd_store::{ScheduleStore, SessionStore};
use muxd_tools::ToolRegistry;
use sha2::{Digest, Sha256};

use crate::lockfile::LockfileHandle;
use crate::runtime::cancel::CancelMap;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::sse_hub::SseHub;
use crate::runtime::turn::AskRegistry;
use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`]. The Lockfile must already be acquired — bind policy and
/// port-probing happen in `main.rs` before this is called, since the
/// Lockfile needs the port the listener actually bound.
pub async fn build_app_state(config: Config, config_path: std::path::PathBuf, lockfile: &LockfileHandle) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("{issue}"),
            ConfigSeverity::Error => tracing::error!("{issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("config validation failed with {} error(s)", issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count());
    }

    let data_dir = crate::paths::data_dir(&config.sessions.data_dir);
    std::fs::create_dir_all(&data_dir).context("creating data directory")?;

    let llm = ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?;
    if llm.is_empty() {
        tracing::info!("no LLM providers configured — session/scheduler endpoints still work, turns will fail with provider_error");
    } else {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }

    let sessions = Arc::new(SessionStore::open(&data_dir).context("opening session store")?);
    let schedules = Arc::new(ScheduleStore::open(&data_dir).context("opening schedule store")?);
    tracing::info!("session and schedule stores ready");

    let tools = ToolRegistry::new();
    tools.register(Arc::new(muxd_tools::builtins::TextEchoTool));
    tools.register(Arc::new(muxd_tools::builtins::AskUserTool));
    let tools = Arc::new(tools);
    tracing::info!(tools = ?tools.names(), "tool registry ready");

    let session_locks = Arc::new(SessionLockMap::new());
    let cancel_map = Arc::new(CancelMap::new());
    let asks = Arc::new(AskRegistry::new());
    let sse_hub = Arc::new(SseHub::new());

    let api_token_hash = Arc::new(Sha256::digest(lockfile.token().as_bytes()).to_vec());

    Ok(AppState {
        config: Arc::new(config.clone()),
        llm: Arc::new(llm),
        sessions,
        schedules,
        tools,
        session_locks,
        cancel_map,
        asks,
        sse_hub,
        api_token_hash,
        connection_token: Arc::new(lockfile.token().to_owned()),
        bound_addr: (lockfile.lockfile.bind_address.clone(), lockfile.lockfile.port),
        workspace_root: data_dir,
        config_path,
    })
}

/// Spawn the long-running background tasks: session-lock pruning, the
/// Scheduler ticker, and (when configured) the Hub heartbeat loop.
/// Returns the Hub's shutdown sender, if a Hub client was started, so the
/// caller can signal it during graceful shutdown.
pub fn spawn_background_tasks(state: &AppState) -> Option<tokio::sync::watch::Sender<bool>> {
    {
        let session_locks = state.session_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                session_locks.prune_idle();
            }
        });
    }

    crate::runtime::scheduler::spawn(state.clone());
    tracing::info!(tick_interval_sec = state.config.scheduler.tick_interval_sec, "scheduler ticker spawned");

    match crate::hub::HubClient::new(&state.config.hub) {
        Ok(Some(client)) => {
            let (tx, rx) = tokio::sync::watch::channel(false);
            let (host, port) = state.bound_addr.clone();
            tokio::spawn(crate::hub::run(client, host, port, rx));
            Some(tx)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "hub client failed to initialize; continuing un-federated");
            None
        }
    }
}
