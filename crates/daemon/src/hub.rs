//! Hub node client (spec §4.7).
//!
//! Optional: when `[hub]` carries a URL, the daemon registers itself with
//! an external relay that federates multiple daemons behind one address.
//! The daemon never acts as a hub itself — this is a thin `reqwest`-based
//! REST caller, not a persistent connection. Registration failure at
//! startup is logged and swallowed; the hub is a collaborator, never a
//! boot dependency.

use std::time::Duration;

use muxd_domain::config::HubConfig;
use muxd_domain::error::{Error, Result};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::runtime::turn::backoff_ms;

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    host: &'a str,
    port: u16,
    version: &'a str,
    auth_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    node_id: String,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    node_id: &'a str,
}

#[derive(Debug, Serialize)]
struct DeregisterRequest<'a> {
    node_id: &'a str,
}

/// A registered client for an external hub relay.
pub struct HubClient {
    http: Client,
    base_url: String,
    client_token: String,
    name: String,
    pub heartbeat_interval: Duration,
}

impl HubClient {
    /// `None` when `[hub]` is not configured (spec §4.7 "absent `url`,
    /// the hub client never starts").
    pub fn new(config: &HubConfig) -> Result<Option<Self>> {
        if !config.enabled() {
            return Ok(None);
        }
        let base_url = config.url.clone().unwrap_or_default().trim_end_matches('/').to_owned();
        let client_token = config.client_token.clone().unwrap_or_default();
        let name = config.name.clone().unwrap_or_else(default_node_name);
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Other(format!("failed to build hub http client: {e}")))?;

        Ok(Some(Self {
            http,
            base_url,
            client_token,
            name,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_sec),
        }))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        if self.client_token.is_empty() {
            rb
        } else {
            rb.bearer_auth(&self.client_token)
        }
    }

    /// `POST register(name, host, port, version, auth_token)`, retried on
    /// transient (connection / 5xx) failure. Returns the hub-assigned
    /// node id, persisted by the caller for subsequent heartbeats.
    pub async fn register(&self, host: &str, port: u16) -> Result<String> {
        let body = RegisterRequest {
            name: &self.name,
            host,
            port,
            version: env!("CARGO_PKG_VERSION"),
            auth_token: &self.client_token,
        };
        let resp: RegisterResponse = self.call_with_retry("/v1/nodes/register", &body, 5).await?;
        Ok(resp.node_id)
    }

    pub async fn heartbeat(&self, node_id: &str) -> Result<()> {
        self.call_with_retry::<_, serde_json::Value>("/v1/nodes/heartbeat", &HeartbeatRequest { node_id }, 3).await?;
        Ok(())
    }

    pub async fn deregister(&self, node_id: &str) -> Result<()> {
        self.call_with_retry::<_, serde_json::Value>("/v1/nodes/deregister", &DeregisterRequest { node_id }, 1).await?;
        Ok(())
    }

    /// POST `body` to `path`, retrying transient failures with the same
    /// jittered-exponential-backoff shape the Agent Loop uses for provider
    /// rate limits (spec §4.7, §9).
    async fn call_with_retry<B, R>(&self, path: &str, body: &B, max_attempts: u32) -> Result<R>
    where
        B: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.url(path);
        let mut attempt = 0u32;
        loop {
            match self.decorate(self.http.post(&url).json(body)).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let text = resp.text().await.map_err(|e| Error::Other(e.to_string()))?;
                    return serde_json::from_str(&text).map_err(Error::Json);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if attempt + 1 >= max_attempts || !status.is_server_error() {
                        return Err(Error::Other(format!("hub {path} returned {status}: {text}")));
                    }
                }
                Err(e) => {
                    if attempt + 1 >= max_attempts {
                        return Err(Error::Other(format!("hub {path} request failed: {e}")));
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(backoff_ms(attempt, None))).await;
            attempt += 1;
        }
    }
}

fn default_node_name() -> String {
    hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "muxd-node".to_string())
}

/// Register with the hub, then run the heartbeat loop until `shutdown`
/// fires, deregistering on the way out. Swallows registration failure —
/// the daemon keeps running un-federated rather than refusing to boot.
pub async fn run(client: HubClient, host: String, port: u16, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let node_id = match client.register(&host, port).await {
        Ok(id) => {
            tracing::info!(node_id = %id, hub = %client.base_url, "registered with hub");
            id
        }
        Err(e) => {
            tracing::warn!(error = %e, "hub registration failed; continuing un-federated");
            return;
        }
    };

    let mut ticker = tokio::time::interval(client.heartbeat_interval);
    ticker.tick().await; // first tick fires immediately; skip it, we just registered

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = client.heartbeat(&node_id).await {
                    tracing::warn!(error = %e, "hub heartbeat failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    if let Err(e) = client.deregister(&node_id).await {
                        tracing::warn!(error = %e, "hub deregister failed");
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_hub_config_yields_no_client() {
        let client = HubClient::new(&HubConfig::default()).unwrap();
        assert!(client.is_none());
    }

    #[test]
    fn enabled_hub_config_builds_client() {
        let cfg = HubConfig { url: Some("https://hub.example.com".into()), client_token: Some("tok".into()), name: Some("node-a".into()), ..HubConfig::default() };
        let client = HubClient::new(&cfg).unwrap().unwrap();
        assert_eq!(client.base_url, "https://hub.example.com");
        assert_eq!(client.name, "node-a");
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let cfg = HubConfig { url: Some("https://hub.example.com/".into()), ..HubConfig::default() };
        let client = HubClient::new(&cfg).unwrap().unwrap();
        assert_eq!(client.base_url, "https://hub.example.com");
    }

    #[test]
    fn default_node_name_is_non_empty() {
        assert!(!default_node_name().is_empty());
    }
}
