pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod qrcode;
pub mod sessions;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router (spec §4.5).
///
/// Routes are split into **public** (`/health`, no auth) and
/// **protected** (everything else, gated behind the Lockfile's bearer
/// token via [`auth::require_api_token`]).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health::health));

    let protected = Router::new()
        .route("/config", get(config::get_config).post(config::post_config))
        .route("/qrcode", get(qrcode::qrcode))
        .route("/sessions", get(sessions::list_sessions).post(sessions::create_session))
        .route("/sessions/:id", get(sessions::get_session).delete(sessions::delete_session).patch(sessions::patch_session))
        .route("/sessions/:id/messages", get(sessions::get_messages))
        .route("/sessions/:id/submit", post(sessions::submit))
        .route("/sessions/:id/ask-response", post(sessions::ask_response))
        .route("/sessions/:id/cancel", post(sessions::cancel))
        .route("/sessions/:id/branch", post(sessions::branch))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public.merge(protected).layer(tower_http::trace::TraceLayer::new_for_http())
}
