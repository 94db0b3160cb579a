use serde::{Deserialize, Serialize};

/// `[hub]` — optional registration with an external relay (spec §4.7).
/// Absent `url`, the hub client never starts; the daemon works fully
/// standalone.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub client_token: Option<String>,
    /// Name this node registers under. Defaults to the local hostname
    /// at startup when unset.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "d_heartbeat_sec")]
    pub heartbeat_interval_sec: u64,
}

impl HubConfig {
    pub fn enabled(&self) -> bool {
        self.url.as_ref().is_some_and(|u| !u.is_empty())
    }
}

fn d_heartbeat_sec() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_url() {
        assert!(!HubConfig::default().enabled());
    }

    #[test]
    fn enabled_with_url() {
        let cfg = HubConfig { url: Some("https://hub.example.com".into()), ..HubConfig::default() };
        assert!(cfg.enabled());
    }

    #[test]
    fn default_heartbeat_is_30s() {
        assert_eq!(HubConfig::default().heartbeat_interval_sec, 30);
    }
}
