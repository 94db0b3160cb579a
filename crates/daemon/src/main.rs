use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use muxd_daemon::bootstrap;
use muxd_daemon::cli::{Cli, Command, ConfigCommand};
use muxd_daemon::{api, lockfile, paths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, config_path) = muxd_daemon::cli::load_config()?;
            run_server(config, config_path.into()).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = muxd_daemon::cli::load_config()?;
            let passed = muxd_daemon::cli::doctor(&config, &config_path).await;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = muxd_daemon::cli::load_config()?;
            if !muxd_daemon::cli::validate_config(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = muxd_daemon::cli::load_config()?;
            muxd_daemon::cli::show_config(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("muxd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,muxd_daemon=debug")))
        .json()
        .init();
}

/// Bind the listener, acquire the Lockfile, wire up `AppState`, and serve
/// until a shutdown signal arrives (spec §4.5, §5 Resource cleanup).
async fn run_server(config: muxd_domain::config::Config, config_path: std::path::PathBuf) -> anyhow::Result<()> {
    tracing::info!("muxd starting");

    let data_dir = paths::data_dir(&config.sessions.data_dir);
    let (listener, bound_port) = bind_with_probing(&config.server.bind_address, config.server.preferred_port, config.server.port_probe_range).await?;

    let lock_path = paths::lockfile_path(&data_dir);
    let lockfile = lockfile::LockfileHandle::acquire(&lock_path, bound_port, &config.server.bind_address).context("acquiring daemon lockfile")?;

    let state = bootstrap::build_app_state(config.clone(), config_path, &lockfile).await?;
    let hub_shutdown = bootstrap::spawn_background_tasks(&state);

    let cors_layer = build_cors_layer(&config.server.cors);
    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second as u64)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(requests_per_second = rl.requests_per_second, burst_size = rl.burst_size, "per-IP rate limiting enabled");

        GovernorLayer { config: std::sync::Arc::new(gov_config) }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    let router = api::router(state.clone()).layer(cors_layer);
    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state.clone())
    } else {
        router.with_state(state.clone())
    };

    tracing::info!(addr = %format!("{}:{}", config.server.bind_address, bound_port), "muxd listening");

    let shutdown_deadline = std::time::Duration::from_secs(config.server.shutdown_deadline_sec);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("axum server error")?;

    tracing::info!(deadline_sec = shutdown_deadline.as_secs(), "shutting down — cancelling in-flight turns");
    let cancelled = state.cancel_map.cancel_all();
    if cancelled > 0 {
        tokio::time::sleep(shutdown_deadline.min(std::time::Duration::from_secs(5))).await;
    }
    if let Err(e) = state.sessions.flush() {
        tracing::warn!(error = %e, "final session store flush failed");
    }
    if let Some(tx) = hub_shutdown {
        let _ = tx.send(true);
    }

    drop(lockfile);
    Ok(())
}

/// Try `preferred_port` first, then `preferred_port + 1 ..= preferred_port
/// + port_probe_range` (spec §4.5 Bind policy).
async fn bind_with_probing(bind_address: &str, preferred_port: u16, port_probe_range: u16) -> anyhow::Result<(tokio::net::TcpListener, u16)> {
    for offset in 0..=port_probe_range {
        let port = preferred_port.saturating_add(offset);
        let addr = format!("{bind_address}:{port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                if offset > 0 {
                    tracing::warn!(preferred_port, bound_port = port, "preferred port unavailable, bound adjacent port");
                }
                return Ok((listener, port));
            }
            Err(e) if offset < port_probe_range => {
                tracing::debug!(addr = %addr, error = %e, "port unavailable, probing next");
            }
            Err(e) => return Err(e).with_context(|| format!("no free port found in {preferred_port}..={} on {bind_address}", preferred_port.saturating_add(port_probe_range))),
        }
    }
    unreachable!("loop always returns or errors on its last iteration")
}

/// Resolves on Ctrl-C or SIGTERM (unix), whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment (e.g.
/// `http://localhost:*`). These are expanded into a predicate that matches
/// any port on that host. A literal `"*"` allows all origins (not
/// recommended for a non-loopback bind).
fn build_cors_layer(cors: &muxd_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
