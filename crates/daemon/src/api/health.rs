//! Public, unauthenticated health probe (spec §4.5 endpoint table):
//! `{mode, provider, model, pid, version}`.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let default_provider = state.llm.list_providers().into_iter().next().and_then(|id| state.llm.get(&id).map(|reg| (id, reg.default_model.clone())));
    let (provider, model) = match default_provider {
        Some((id, model)) => (Some(id), Some(model)),
        None => (None, None),
    };

    Json(serde_json::json!({
        "mode": "local",
        "provider": provider,
        "model": model,
        "pid": std::process::id(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
