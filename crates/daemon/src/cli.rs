//! CLI entry point (component J "Glue").
//!
//! Deliberately small: the daemon is driven almost entirely through its
//! HTTP API, so the CLI only covers what a client needs before that API
//! is reachable — starting the server, inspecting config, and a local
//! health check.

use clap::{Parser, Subcommand};
use muxd_domain::config::{Config, ConfigSeverity};

#[derive(Debug, Parser)]
#[command(name = "muxd", version, about = "Local coding-agent daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the daemon (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load `config.toml` from `MUXD_CONFIG` (default `config.toml`), falling
/// back to an all-defaults `Config` when the file doesn't exist.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("MUXD_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

/// `muxd config validate` — prints every issue, exits non-zero on error.
pub fn validate_config(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }
    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// `muxd config show` — the resolved config (all defaults filled in) as TOML.
pub fn show_config(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}

/// `muxd doctor` — a handful of local environment checks; no network
/// calls beyond an optional hub reachability probe.
pub async fn doctor(config: &Config, config_path: &str) -> bool {
    println!("muxd doctor");
    println!("===========\n");

    let mut all_passed = true;
    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_data_dir(config, &mut all_passed);
    check_llm_providers(config, &mut all_passed);
    check_hub(config, &mut all_passed).await;

    println!();
    println!("{}", if all_passed { "All checks passed." } else { "Some checks failed. Review the output above." });
    all_passed
}

fn print_check(name: &str, passed: bool, detail: String) {
    println!("  [{}] {name}: {detail}", if passed { "PASS" } else { "FAIL" });
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists { config_path.to_owned() } else { format!("{config_path} not found (using defaults)") },
    );
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();
    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check("Config validation", error_count == 0, format!("{} issue(s) ({error_count} error(s))", issues.len()));
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_data_dir(config: &Config, all_passed: &mut bool) {
    let dir = crate::paths::data_dir(&config.sessions.data_dir);
    let exists = dir.exists() || std::fs::create_dir_all(&dir).is_ok();
    let writable = if exists {
        let probe = dir.join(".muxd_doctor_probe");
        let ok = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);
        ok
    } else {
        false
    };
    let ok = exists && writable;
    print_check("Data directory", ok, format!("{} ({})", dir.display(), if ok { "writable" } else { "not writable" }));
    if !ok {
        *all_passed = false;
    }
}

fn check_llm_providers(config: &Config, all_passed: &mut bool) {
    let count = config.llm.providers.len();
    print_check("LLM providers configured", count > 0, if count > 0 { format!("{count} provider(s)") } else { "none configured".into() });
}

async fn check_hub(config: &Config, all_passed: &mut bool) {
    if !config.hub.enabled() {
        print_check("Hub", true, "not configured (standalone)".into());
        return;
    }
    let url = config.hub.url.as_deref().unwrap_or_default();
    let reachable = match reqwest::Client::builder().timeout(std::time::Duration::from_secs(5)).build() {
        Ok(client) => client.get(url).send().await.is_ok(),
        Err(_) => false,
    };
    print_check("Hub reachable", reachable, if reachable { url.to_owned() } else { format!("{url} (unreachable)") });
    if !reachable {
        *all_passed = false;
    }
}
