use serde::{Deserialize, Serialize};

/// `[server]` — bind policy and CORS.
///
/// `preferred_port` is a starting point only: the Daemon Server probes
/// adjacent ports on bind failure (see spec §4.5) and records whichever
/// port it actually bound in the Lockfile, not necessarily this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub preferred_port: u16,
    /// Bind address. Defaults to loopback; a non-loopback value is an
    /// explicit opt-in (see spec §4.5 Bind policy) and is echoed into the
    /// Lockfile so same-host clients can still find the daemon.
    #[serde(default = "d_host")]
    pub bind_address: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// How many adjacent ports to probe before giving up.
    #[serde(default = "d_port_probe_range")]
    pub port_probe_range: u16,
    /// Shutdown deadline in seconds (spec §5 Resource cleanup).
    #[serde(default = "d_shutdown_deadline")]
    pub shutdown_deadline_sec: u64,
    /// Per-IP token-bucket rate limiting via `tower_governor`. Absent by
    /// default — a single-user local daemon has no need for it, but the
    /// knob exists for a non-loopback bind.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            preferred_port: d_port(),
            bind_address: d_host(),
            cors: CorsConfig::default(),
            port_probe_range: d_port_probe_range(),
            shutdown_deadline_sec: d_shutdown_deadline(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl ServerConfig {
    /// A non-loopback bind address is an explicit opt-in per spec §4.5.
    pub fn is_non_loopback(&self) -> bool {
        !matches!(self.bind_address.as_str(), "127.0.0.1" | "localhost" | "::1")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { allowed_origins: d_cors_origins() }
    }
}

fn d_port() -> u16 {
    4096
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port_probe_range() -> u16 {
    20
}
fn d_shutdown_deadline() -> u64 {
    5
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
