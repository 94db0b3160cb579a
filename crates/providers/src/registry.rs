//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances. At startup
//! the registry resolves each provider's `AuthConfig` eagerly (env vars are
//! read, keychains queried) and instantiates the matching adapter.

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::Provider;
use crate::util::resolve_api_key;
use muxd_domain::config::{LlmConfig, LlmStartupPolicy, ProviderKind};
use muxd_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A registered provider plus the resolved credential and default model
/// needed to actually call it — bundled together so the Agent Loop never
/// has to re-resolve auth per turn.
pub struct RegisteredProvider {
    pub provider: Arc<dyn Provider>,
    pub api_key: String,
    pub default_model: String,
}

/// Holds all instantiated LLM providers.
///
/// When the startup policy is `allow_none`, the registry also records
/// initialization errors so they can be surfaced by the daemon's
/// readiness endpoint.
pub struct ProviderRegistry {
    providers: HashMap<String, RegisteredProvider>,
    init_errors: Vec<ProviderInitError>,
}

#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens before they
/// reach logs or a readiness endpoint.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20 && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            let masked = if trimmed.len() > 8 { format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]) } else { "***masked***".to_string() };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers = HashMap::new();
        let mut init_errors = Vec::new();

        for pc in &config.providers {
            let result: Result<RegisteredProvider> = (|| {
                let api_key = resolve_api_key(&pc.auth)?;
                let default_model = pc.default_model.clone().unwrap_or_else(|| match pc.kind {
                    ProviderKind::Anthropic => "claude-sonnet-4-20250514".into(),
                    ProviderKind::OpenaiCompat => "gpt-4o".into(),
                });
                let provider: Arc<dyn Provider> = match pc.kind {
                    ProviderKind::OpenaiCompat => Arc::new(OpenAiCompatProvider::from_config(pc)?),
                    ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_config(pc)?),
                };
                Ok(RegisteredProvider { provider, api_key, default_model })
            })();

            match result {
                Ok(reg) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    providers.insert(pc.id.clone(), reg);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(provider_id = %pc.id, kind = ?pc.kind, error = %safe_error, "failed to initialize LLM provider, skipping");
                    init_errors.push(ProviderInitError { provider_id: pc.id.clone(), kind: format!("{:?}", pc.kind), error: safe_error });
                }
            }
        }

        if providers.is_empty() && !config.providers.is_empty() && config.startup_policy == LlmStartupPolicy::RequireOne {
            return Err(Error::Config("all configured LLM providers failed to initialize (startup_policy = require_one)".into()));
        }
        if providers.is_empty() && !config.providers.is_empty() {
            tracing::warn!(
                failed_providers = init_errors.len(),
                "no LLM providers initialized (startup_policy = allow_none); turns will fail with provider_error until auth is configured"
            );
        }

        Ok(Self { providers, init_errors })
    }

    pub fn get(&self, provider_id: &str) -> Option<&RegisteredProvider> {
        self.providers.get(provider_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegisteredProvider)> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::config::{AuthConfig, AuthMode, ProviderConfig};

    fn provider_cfg(id: &str, kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            id: id.into(),
            kind,
            base_url: "https://example.test".into(),
            auth: AuthConfig { mode: AuthMode::None, ..Default::default() },
            default_model: None,
        }
    }

    #[test]
    fn registers_providers_with_resolvable_auth() {
        let cfg = LlmConfig { providers: vec![provider_cfg("p1", ProviderKind::Anthropic)], ..Default::default() };
        let registry = ProviderRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("p1").is_some());
    }

    #[test]
    fn unresolvable_auth_is_skipped_under_allow_none() {
        let mut pc = provider_cfg("p1", ProviderKind::Anthropic);
        pc.auth = AuthConfig { mode: AuthMode::ApiKey, ..Default::default() }; // no env set -> fails
        let cfg = LlmConfig { providers: vec![pc], startup_policy: LlmStartupPolicy::AllowNone, ..Default::default() };
        let registry = ProviderRegistry::from_config(&cfg).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.init_errors().len(), 1);
    }

    #[test]
    fn unresolvable_auth_fails_startup_under_require_one() {
        let mut pc = provider_cfg("p1", ProviderKind::Anthropic);
        pc.auth = AuthConfig { mode: AuthMode::ApiKey, ..Default::default() };
        let cfg = LlmConfig { providers: vec![pc], startup_policy: LlmStartupPolicy::RequireOne, ..Default::default() };
        let err = ProviderRegistry::from_config(&cfg).unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn mask_secrets_redacts_long_tokens() {
        let msg = "auth failed for key sk-abcdefghijklmnopqrstuvwxyz";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("abcdefghijklmnopqrstuvwxyz"));
    }
}
