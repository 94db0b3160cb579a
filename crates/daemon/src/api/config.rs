//! `GET`/`POST /config` — effective preferences (spec §4.5, "Patch
//! preferences").
//!
//! Every request/response body is JSON (spec §6), including this one:
//! `POST` takes a partial `Config` object as an RFC 7386 JSON merge patch
//! over the *current* config, not a full-document replacement — an
//! incomplete body only touches the fields it names, so posting
//! `{"server": {"preferred_port": 5000}}` can't silently reset
//! `[llm].providers` (and the API keys/env names they carry) back to
//! their defaults. The merged result is validated as a full `Config`
//! before anything is written to `config_path` (backing up the previous
//! file first); it does not hot-swap the in-memory `Config` the running
//! daemon holds — restart to pick the new file up, matching the
//! Scheduler/Hub's own startup-only config reads.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use muxd_domain::config::Config;
use serde_json::Value;

use crate::state::AppState;

pub async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json((*state.config).clone())
}

pub async fn post_config(State(state): State<AppState>, Json(patch): Json<Value>) -> impl IntoResponse {
    let current = match serde_json::to_value(&*state.config) {
        Ok(v) => v,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response(),
    };
    let mut merged = current;
    merge_patch(&mut merged, &patch);

    let parsed: Config = match serde_json::from_value(merged) {
        Ok(c) => c,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": format!("invalid config: {e}") }))).into_response(),
    };

    let issues = parsed.validate();
    if issues.iter().any(|i| i.severity == muxd_domain::config::ConfigSeverity::Error) {
        let messages: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "config validation failed", "issues": messages }))).into_response();
    }

    let toml = match toml::to_string_pretty(&parsed) {
        Ok(t) => t,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response(),
    };

    if let Err(e) = write_config(&state.config_path, &toml).await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response();
    }

    (StatusCode::OK, Json(serde_json::json!({ "status": "written", "restart_required": true }))).into_response()
}

/// Apply an RFC 7386 JSON merge patch: objects are merged key-by-key
/// (recursively), `null` removes a key, and any other value (including
/// arrays) replaces the target wholesale.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_obj) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let target_obj = target.as_object_mut().expect("just coerced to object");

    for (key, value) in patch_obj {
        if value.is_null() {
            target_obj.remove(key);
            continue;
        }
        merge_patch(target_obj.entry(key.clone()).or_insert(Value::Null), value);
    }
}

async fn write_config(config_path: &std::path::Path, body: &str) -> anyhow::Result<()> {
    if config_path.exists() {
        let ts = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let backup_name = format!("{}.bak.{ts}", config_path.file_name().unwrap_or_default().to_string_lossy());
        let backup = config_path.with_file_name(backup_name);
        if let Err(e) = tokio::fs::copy(config_path, &backup).await {
            tracing::warn!(error = %e, "failed to back up config before overwrite");
        }
    }

    let tmp_path = config_path.with_extension("toml.tmp");
    tokio::fs::write(&tmp_path, body).await?;
    tokio::fs::rename(&tmp_path, config_path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_config_returns_current_config() {
        let (_d, state) = crate::state::test_support::fixture_with_token("tok");
        let resp = get_config(State(state.clone())).await;
        assert_eq!(resp.0.server.preferred_port, state.config.server.preferred_port);
    }

    #[tokio::test]
    async fn post_config_rejects_invalid_values() {
        let (_d, state) = crate::state::test_support::fixture_with_token("tok");
        let resp = post_config(State(state), Json(serde_json::json!({ "server": { "preferred_port": 0 } }))).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_config_writes_valid_config_to_disk() {
        let (_d, state) = crate::state::test_support::fixture_with_token("tok");
        let resp = post_config(State(state.clone()), Json(serde_json::json!({ "server": { "preferred_port": 5000 } }))).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.config_path.exists());
    }

    #[tokio::test]
    async fn post_config_patch_does_not_reset_unrelated_fields() {
        let (_d, state) = crate::state::test_support::fixture_with_token("tok");
        let before_retries = state.config.llm.max_retries;
        let resp = post_config(State(state.clone()), Json(serde_json::json!({ "server": { "preferred_port": 5001 } }))).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let written = std::fs::read_to_string(&state.config_path).unwrap();
        let parsed: Config = toml::from_str(&written).unwrap();
        assert_eq!(parsed.server.preferred_port, 5001);
        assert_eq!(parsed.llm.max_retries, before_retries);
    }
}
