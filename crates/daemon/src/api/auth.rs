//! Bearer-token authentication middleware.
//!
//! The token is never optional: the Lockfile always generates one at
//! startup (spec §4.5), so every protected route enforces it
//! unconditionally. Only `/health` is public; every other route, including
//! `/qrcode`, sits behind this middleware.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_api_token(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(state.api_token_hash.as_slice())) {
        return (StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({ "error": "invalid or missing bearer token" }))).into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let (_dir, state) = crate::state::test_support::fixture_with_token("secret");
        let app = Router::new().route("/x", get(|| async { "ok" })).route_layer(axum::middleware::from_fn_with_state(state.clone(), require_api_token)).with_state(state);
        let resp = app.oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_token_is_accepted() {
        let (_dir, state) = crate::state::test_support::fixture_with_token("secret");
        let app = Router::new().route("/x", get(|| async { "ok" })).route_layer(axum::middleware::from_fn_with_state(state.clone(), require_api_token)).with_state(state);
        let resp = app.oneshot(Request::builder().uri("/x").header("authorization", "Bearer secret").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let (_dir, state) = crate::state::test_support::fixture_with_token("secret");
        let app = Router::new().route("/x", get(|| async { "ok" })).route_layer(axum::middleware::from_fn_with_state(state.clone(), require_api_token)).with_state(state);
        let resp = app.oneshot(Request::builder().uri("/x").header("authorization", "Bearer wrong").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
