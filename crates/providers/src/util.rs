//! Shared utility functions for provider adapters.

use muxd_domain::config::{AuthConfig, AuthMode};
use muxd_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    Error::Other(format!("http transport: {e}"))
}

/// Parse a `retry-after` response header (delay-seconds form) into
/// milliseconds, for the `Error::RateLimited` backoff hint (spec §4.4
/// step 4, §8 Retry bound).
pub(crate) fn parse_retry_after_ms(resp: &reqwest::Response) -> Option<u64> {
    resp.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok().map(|secs| secs * 1000)
}

/// Resolve the API key for a provider from its [`AuthConfig`].
///
/// `AuthMode::None` means the endpoint needs no credential (e.g. a local
/// Ollama server) and resolves to an empty string. `AuthMode::Keychain`
/// reads the OS credential store via `keyring`, falling back to a
/// headless env var named `{SERVICE}_{ACCOUNT}` (uppercased) so CI and
/// server installs without a keychain daemon still work.
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    match auth.mode {
        AuthMode::None => Ok(String::new()),
        AuthMode::ApiKey => {
            if let Some(ref env_var) = auth.env {
                return std::env::var(env_var)
                    .map_err(|_| Error::Auth(format!("environment variable '{env_var}' not set or not valid UTF-8")));
            }
            Err(Error::Auth("auth.mode = api_key requires 'env' to be set".into()))
        }
        AuthMode::Keychain => {
            let (service, account) = match (&auth.service, &auth.account) {
                (Some(s), Some(a)) => (s, a),
                _ => return Err(Error::Auth("auth.mode = keychain requires 'service' and 'account'".into())),
            };
            match resolve_from_keychain(service, account) {
                Ok(secret) => Ok(secret),
                Err(e) => {
                    let fallback_var = keychain_fallback_env_name(service, account);
                    std::env::var(&fallback_var).map_err(|_| {
                        tracing::warn!(service = %service, account = %account, error = %e, "keychain lookup failed and no fallback env var set");
                        Error::Auth(format!("keychain lookup failed and env var '{fallback_var}' not set: {e}"))
                    })
                }
            }
        }
    }
}

pub fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account).map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry.get_password().map_err(|e| Error::Auth(format!("keyring get_password failed: {e}")))
}

/// Build the headless fallback env var name for a keychain service/account.
/// `("muxd", "anthropic-key")` → `"MUXD_ANTHROPIC_KEY"`.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!("{}_{}", service.to_uppercase().replace('-', "_"), account.to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(mode: AuthMode) -> AuthConfig {
        AuthConfig { mode, header: None, prefix: None, env: None, service: None, account: None }
    }

    #[test]
    fn fallback_env_name_basic() {
        assert_eq!(keychain_fallback_env_name("muxd", "anthropic-key"), "MUXD_ANTHROPIC_KEY");
    }

    #[test]
    fn resolve_api_key_none_mode_is_empty() {
        assert_eq!(resolve_api_key(&auth(AuthMode::None)).unwrap(), "");
    }

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "MUXD_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let mut a = auth(AuthMode::ApiKey);
        a.env = Some(var_name.into());
        assert_eq!(resolve_api_key(&a).unwrap(), "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let mut a = auth(AuthMode::ApiKey);
        a.env = Some("MUXD_TEST_NONEXISTENT_VAR_8888".into());
        let err = resolve_api_key(&a).unwrap_err();
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn resolve_api_key_requires_env_for_api_key_mode() {
        let err = resolve_api_key(&auth(AuthMode::ApiKey)).unwrap_err();
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn resolve_api_key_keychain_requires_service_and_account() {
        let err = resolve_api_key(&auth(AuthMode::Keychain)).unwrap_err();
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn resolve_api_key_keychain_fallback_env() {
        let fallback_var = "MUXD_MY_PROVIDER";
        std::env::set_var(fallback_var, "fallback-secret");
        let mut a = auth(AuthMode::Keychain);
        a.service = Some("muxd".into());
        a.account = Some("my-provider".into());
        let result = resolve_api_key(&a).unwrap();
        assert_eq!(result, "fallback-secret");
        std::env::remove_var(fallback_var);
    }
}
