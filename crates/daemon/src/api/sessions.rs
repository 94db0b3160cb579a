//! Session management endpoints (spec §4.5 endpoint table).

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use muxd_domain::error::Error;
use muxd_domain::message::Session;
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::runtime::turn::{run_turn, TurnEvent, TurnInput};
use crate::state::AppState;

// ── Request / response shapes ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub project: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatchSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct AskResponseRequest {
    pub ask_id: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct BranchRequest {
    #[serde(default)]
    pub at_sequence: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<muxd_domain::message::Message>,
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn list_sessions(State(state): State<AppState>, Query(query): Query<ListSessionsQuery>) -> Json<Vec<Session>> {
    Json(state.sessions.list_sessions(query.project.as_deref(), query.limit))
}

pub async fn create_session(State(state): State<AppState>, Json(body): Json<CreateSessionRequest>) -> ApiResult<Json<Session>> {
    let session = state.sessions.create_session(&body.project, body.model)?;
    Ok(Json(session))
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Session>> {
    state.sessions.get_session(&id).map(Json).ok_or_else(|| ApiError(Error::NotFound(format!("session {id}"))))
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.sessions.delete_session(&id)?;
    state.cancel_map.remove(&id);
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn patch_session(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<PatchSessionRequest>) -> ApiResult<Json<Session>> {
    if let Some(title) = &body.title {
        state.sessions.update_session_title(&id, title)?;
    }
    if let Some(tags) = body.tags {
        state.sessions.update_session_tags(&id, tags)?;
    }
    if body.model.is_some() {
        state.sessions.update_session_model(&id, body.model)?;
    }
    state.sessions.get_session(&id).map(Json).ok_or_else(|| ApiError(Error::NotFound(format!("session {id}"))))
}

pub async fn get_messages(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<MessagesResponse>> {
    let messages = state.sessions.get_messages(&id)?;
    Ok(Json(MessagesResponse { messages }))
}

/// `POST /sessions/:id/submit` — start a turn, stream it as SSE.
///
/// `409 Conflict` (via [`crate::runtime::session_lock::SessionBusy`]) if a
/// turn is already live for this session; never queues behind it.
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SubmitRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>> {
    if state.sessions.get_session(&id).is_none() {
        return Err(ApiError(Error::NotFound(format!("session {id}"))));
    }

    let permit = state.session_locks.acquire(&id).map_err(|_| ApiError(Error::Conflict("a turn is already in flight for this session".into())))?;

    let rx = run_turn(state.clone(), TurnInput { session_id: id.clone(), user_text: body.text }, permit);
    let broadcast_rx = state.sse_hub.publish(id, rx, state.sse_hub.clone());

    Ok(Sse::new(turn_event_stream(broadcast_rx)).keep_alive(KeepAlive::default()))
}

/// `GET /sessions/:id/events` is not part of the documented endpoint
/// table, but a live turn can be observed mid-flight by any subscriber
/// that already knows it's running (e.g. a second client tab); this
/// helper is used by tests exercising that fan-out path directly.
fn turn_event_stream(mut rx: tokio::sync::broadcast::Receiver<TurnEvent>) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let is_terminal = matches!(event, TurnEvent::TurnDone | TurnEvent::Canceled | TurnEvent::Error { .. });
                    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".into());
                    yield Ok(Event::default().data(data));
                    if is_terminal {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

pub async fn ask_response(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<AskResponseRequest>) -> ApiResult<impl IntoResponse> {
    let _ = id;
    state.asks.respond(&body.ask_id, body.answer)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state.cancel_map.cancel(&id);
    axum::http::StatusCode::NO_CONTENT
}

pub async fn branch(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<BranchRequest>) -> ApiResult<Json<Session>> {
    let at_sequence = body.at_sequence.unwrap_or(0);
    let branched = state.sessions.branch_session(&id, at_sequence)?;
    Ok(Json(branched))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (tempfile::TempDir, AppState) {
        crate::state::test_support::fixture_with_token("tok")
    }

    #[tokio::test]
    async fn create_then_get_session_round_trips() {
        let (_d, state) = state();
        let created = create_session(State(state.clone()), Json(CreateSessionRequest { project: "/proj".into(), model: None })).await.unwrap();
        let fetched = get_session(State(state), Path(created.0.id.clone())).await.unwrap();
        assert_eq!(fetched.0.id, created.0.id);
    }

    #[tokio::test]
    async fn get_unknown_session_is_not_found() {
        let (_d, state) = state();
        let err = get_session(State(state), Path("missing".into())).await.unwrap_err();
        assert_eq!(err.0.kind(), "not_found");
    }

    #[tokio::test]
    async fn patch_updates_title_and_tags() {
        let (_d, state) = state();
        let created = create_session(State(state.clone()), Json(CreateSessionRequest { project: "/proj".into(), model: None })).await.unwrap();
        let patched = patch_session(
            State(state),
            Path(created.0.id.clone()),
            Json(PatchSessionRequest { title: Some("new title".into()), tags: Some(vec!["x".into()]), model: None }),
        )
        .await
        .unwrap();
        assert_eq!(patched.0.title, "new title");
        assert_eq!(patched.0.tags, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (_d, state) = state();
        let created = create_session(State(state.clone()), Json(CreateSessionRequest { project: "/proj".into(), model: None })).await.unwrap();
        delete_session(State(state.clone()), Path(created.0.id.clone())).await.unwrap();
        assert!(get_session(State(state), Path(created.0.id.clone())).await.is_err());
    }

    #[tokio::test]
    async fn branch_at_sequence_zero_uses_current_max() {
        let (_d, state) = state();
        let created = create_session(State(state.clone()), Json(CreateSessionRequest { project: "/proj".into(), model: None })).await.unwrap();
        let branched = branch(State(state), Path(created.0.id.clone()), Json(BranchRequest { at_sequence: None })).await.unwrap();
        assert_eq!(branched.0.parent_session_id.as_deref(), Some(created.0.id.as_str()));
    }

    #[tokio::test]
    async fn ask_response_to_unknown_ask_id_is_not_found() {
        let (_d, state) = state();
        let err = ask_response(State(state), Path("s1".into()), Json(AskResponseRequest { ask_id: "missing".into(), answer: "x".into() })).await.unwrap_err();
        assert_eq!(err.0.kind(), "not_found");
    }

    #[tokio::test]
    async fn submit_against_unknown_session_is_not_found() {
        let (_d, state) = state();
        let err = submit(State(state), Path("missing".into()), Json(SubmitRequest { text: "hi".into() })).await;
        assert!(err.is_err());
    }
}
