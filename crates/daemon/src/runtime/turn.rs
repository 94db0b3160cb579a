//! The Agent Loop (spec §4.4): streams the model-tool-model cycle to
//! completion for a single turn, persisting every step and surviving
//! rate limits, cancellation, and `ask_user` suspension.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use muxd_domain::error::{Error, Result};
use muxd_domain::message::{
    ContentBlock, Message as StoreMessage, MessageContent as StoreContent, Role as StoreRole,
};
use muxd_domain::stream::{BoxStream, ProviderErrorKind, ProviderEvent, StopReason};
use muxd_domain::tool::{ContentPart, Message as WireMessage, MessageContent as WireContent, Role as WireRole};
use muxd_domain::CancelToken;
use muxd_providers::registry::RegisteredProvider;
use muxd_tools::{ToolContext, ToolOutput};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};

use crate::runtime::compact::{build_compaction, plan_compaction, repair_dangling, should_compact, summarize_dropped};
use crate::state::AppState;

/// Safety net against a pathological tool-calling loop that never
/// reaches `stop(reason != tool_use)`.
pub const MAX_TOOL_LOOPS: usize = 25;

/// Events streamed to SSE subscribers — the provider-level events of
/// `muxd_domain::stream::ProviderEvent` plus the loop-level ones spec
/// §4.5 names: `compacted` and `titled`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TurnStart,
    Delta { text: String },
    ToolStart { id: String, name: String },
    ToolDone { id: String, name: String, result: String, is_error: bool },
    AskUser { ask_id: String, prompt: String },
    Retrying { attempt: u32, wait_ms: u64, message: String },
    Compacted { dropped_count: usize, cutoff_sequence: u64 },
    Titled { title: String, tags: Vec<String> },
    StreamDone,
    TurnDone,
    Canceled,
    Error { kind: String, message: String },
}

/// What the Daemon Server hands the Loop to start a turn.
pub struct TurnInput {
    pub session_id: String,
    pub user_text: String,
}

/// Per-session `ask_user` awaiters, keyed by the tool_use id that was
/// suspended. The server's `/sessions/:id/ask-response` handler resolves
/// one of these; cancellation drops it, which the waiting `oneshot::Receiver`
/// observes as a closed channel.
pub struct AskRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl AskRegistry {
    pub fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, ask_id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(ask_id.to_owned(), tx);
        rx
    }

    /// Resolve a pending ask. Errors with `NotFound` if `ask_id` has no
    /// registered awaiter — the 404 case spec §4.5 names for
    /// `/ask-response`.
    pub fn respond(&self, ask_id: &str, answer: String) -> Result<()> {
        let tx = self.pending.lock().remove(ask_id).ok_or_else(|| Error::NotFound(format!("no pending ask_user '{ask_id}'")))?;
        tx.send(answer).map_err(|_| Error::Other("ask_user awaiter already gone".into()))
    }

    pub fn cancel(&self, ask_id: &str) {
        self.pending.lock().remove(ask_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for AskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the turn as a background task and return the event receiver. The
/// caller is responsible for having already obtained `permit` from the
/// session's [`crate::runtime::session_lock::SessionLockMap`] — holding it
/// for the task's lifetime is what enforces at-most-one-turn-per-session.
pub fn run_turn(state: AppState, input: TurnInput, permit: OwnedSemaphorePermit) -> mpsc::Receiver<TurnEvent> {
    let (tx, rx) = mpsc::channel(256);
    let session_id = input.session_id.clone();
    tokio::spawn(async move {
        let _permit = permit;
        run_turn_inner(&state, input, tx).await;
        state.cancel_map.remove(&session_id);
    });
    rx
}

async fn run_turn_inner(state: &AppState, input: TurnInput, tx: mpsc::Sender<TurnEvent>) {
    let session_id = input.session_id.clone();
    let cancel = state.cancel_map.register(&session_id);
    let _ = tx.send(TurnEvent::TurnStart).await;

    let session = match state.sessions.get_session(&session_id) {
        Some(s) => s,
        None => {
            emit_error(&tx, &Error::NotFound(format!("session {session_id}"))).await;
            return;
        }
    };
    let is_first_turn = session.message_count == 0;

    let registered = match resolve_provider(state, session.model.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            emit_error(&tx, &e).await;
            return;
        }
    };
    let model_id = session.model.clone().unwrap_or_else(|| registered.default_model.clone());

    if let Err(e) = state.sessions.append_message(&session_id, StoreRole::User, StoreContent::Text { content: input.user_text.clone() }, 0) {
        emit_error(&tx, &e).await;
        return;
    }

    let profile = state.config.tools.profile;
    let tool_defs = state.tools.definitions_for(profile, &state.config.tools);

    let mut loops = 0usize;
    let mut final_text = String::new();

    'turn: loop {
        loops += 1;
        if loops > MAX_TOOL_LOOPS {
            emit_error(&tx, &Error::Other("exceeded maximum tool-call loops for this turn".into())).await;
            return;
        }

        let (prompt_messages, compaction_event) = match assemble_prompt(state, &session_id) {
            Ok(v) => v,
            Err(e) => {
                emit_error(&tx, &e).await;
                return;
            }
        };
        if let Some(ev) = compaction_event {
            let _ = tx.send(ev).await;
        }

        let outcome = call_with_retry(state, &registered, &model_id, &prompt_messages, &tool_defs, &cancel, &tx).await;

        let (reason, in_tokens, out_tokens, text, tool_calls) = match outcome {
            CallOutcome::Stop { reason, in_tokens, out_tokens, text, tool_calls } => (reason, in_tokens, out_tokens, text, tool_calls),
            CallOutcome::Canceled => {
                let _ = tx.send(TurnEvent::Canceled).await;
                return;
            }
            CallOutcome::Terminal(e) => {
                emit_error(&tx, &e).await;
                return;
            }
        };

        let _ = state.sessions.update_session_tokens(&session_id, in_tokens as u64, out_tokens as u64);

        if matches!(reason, StopReason::ToolUse) && !tool_calls.is_empty() {
            let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
            if !text.is_empty() {
                blocks.push(ContentBlock::text(text.clone()));
            }
            for (id, name, input) in &tool_calls {
                blocks.push(ContentBlock::tool_use(id.clone(), name.clone(), input.clone()));
            }
            if let Err(e) = state.sessions.append_message(&session_id, StoreRole::Assistant, StoreContent::Blocks { content: blocks }, out_tokens as u64) {
                emit_error(&tx, &e).await;
                return;
            }

            let results = match dispatch_tool_calls(state, &session_id, &cancel, tool_calls, &tx).await {
                Some(r) => r,
                None => {
                    let _ = tx.send(TurnEvent::Canceled).await;
                    return;
                }
            };

            if let Err(e) = state.sessions.append_message(&session_id, StoreRole::User, StoreContent::Blocks { content: results }, 0) {
                emit_error(&tx, &e).await;
                return;
            }

            continue 'turn;
        }

        if let Err(e) = state.sessions.append_message(&session_id, StoreRole::Assistant, StoreContent::Text { content: text.clone() }, out_tokens as u64) {
            emit_error(&tx, &e).await;
            return;
        }
        final_text = text;
        let _ = tx.send(TurnEvent::StreamDone).await;
        let _ = tx.send(TurnEvent::TurnDone).await;
        break 'turn;
    }

    if is_first_turn {
        run_titling(state, &session_id, &registered, &model_id, &cancel, &input.user_text, &final_text, &tx).await;
    }
}

async fn emit_error(tx: &mpsc::Sender<TurnEvent>, e: &Error) {
    let _ = tx.send(TurnEvent::Error { kind: e.kind().to_owned(), message: e.to_string() }).await;
}

fn resolve_provider<'a>(state: &'a AppState, model: Option<&str>) -> Result<&'a RegisteredProvider> {
    if state.llm.is_empty() {
        return Err(Error::Provider { provider: "none".into(), message: "no LLM providers configured".into() });
    }
    if let Some(model) = model {
        for (_, reg) in state.llm.iter() {
            if reg.default_model == model {
                return Ok(reg);
            }
        }
    }
    let id = state.llm.list_providers().into_iter().next().expect("checked non-empty above");
    Ok(state.llm.get(&id).expect("id came from list_providers"))
}

// ── Prompt assembly (spec §4.4 step 2) ──────────────────────────────

fn assemble_prompt(state: &AppState, session_id: &str) -> Result<(Vec<WireMessage>, Option<TurnEvent>)> {
    let compaction = state.sessions.latest_compaction(session_id);
    let cutoff = compaction.as_ref().map(|c| c.cutoff_sequence).unwrap_or(0);
    let tail = repair_dangling(state.sessions.get_messages_after(session_id, cutoff)?);

    if should_compact(&tail, state.config.sessions.compaction_threshold_tokens) {
        if let Some(plan) = plan_compaction(&tail, state.config.sessions.compaction_tail_messages) {
            let new_compaction = build_compaction(session_id, &plan);
            state.sessions.save_compaction(session_id, &new_compaction.summary_text, new_compaction.cutoff_sequence)?;

            let mut wire: Vec<WireMessage> = plan.prefix.iter().map(convert_message).collect();
            wire.push(WireMessage::system(format!(
                "[context compaction] {} earlier messages prior to sequence {} were summarized.",
                plan.dropped_count, plan.cutoff_sequence
            )));
            wire.push(WireMessage::system(summarize_dropped(&plan)));
            wire.extend(plan.tail.iter().map(convert_message));

            let event = TurnEvent::Compacted { dropped_count: plan.dropped_count, cutoff_sequence: plan.cutoff_sequence };
            return Ok((wire, Some(event)));
        }
    }

    let mut wire = Vec::with_capacity(tail.len() + 1);
    if let Some(c) = &compaction {
        wire.push(WireMessage::system(format!("[earlier conversation summary] {}", c.summary_text)));
    }
    wire.extend(tail.iter().map(convert_message));
    Ok((wire, None))
}

fn convert_message(m: &StoreMessage) -> WireMessage {
    let role = match m.role {
        StoreRole::User => WireRole::User,
        StoreRole::Assistant => WireRole::Assistant,
        StoreRole::System => WireRole::System,
    };
    let content = match &m.content {
        StoreContent::Text { content } => WireContent::Text(content.clone()),
        StoreContent::Blocks { content } => WireContent::Parts(content.iter().map(convert_block).collect()),
    };
    WireMessage { role, content }
}

fn convert_block(b: &ContentBlock) -> ContentPart {
    match b {
        ContentBlock::Text { text } => ContentPart::Text { text: text.clone() },
        ContentBlock::ToolUse { tool_use_id, tool_name, tool_input, .. } => {
            ContentPart::ToolUse { id: tool_use_id.clone(), name: tool_name.clone(), input: tool_input.clone() }
        }
        ContentBlock::ToolResult { tool_use_id, tool_result, is_error } => {
            ContentPart::ToolResult { tool_use_id: tool_use_id.clone(), content: tool_result.clone(), is_error: *is_error }
        }
    }
}

// ── Provider call + rate-limit retry (spec §4.4 step 4, §9 Retries) ─

enum CallOutcome {
    Stop { reason: StopReason, in_tokens: u32, out_tokens: u32, text: String, tool_calls: Vec<(String, String, Value)> },
    Canceled,
    Terminal(Error),
}

async fn call_with_retry(
    state: &AppState,
    registered: &RegisteredProvider,
    model_id: &str,
    prompt_messages: &[WireMessage],
    tool_defs: &[muxd_domain::tool::ToolDefinition],
    cancel: &CancelToken,
    tx: &mpsc::Sender<TurnEvent>,
) -> CallOutcome {
    let mut calls = 0u32;
    loop {
        if cancel.is_cancelled() {
            return CallOutcome::Canceled;
        }
        calls += 1;

        let stream = match registered.provider.stream(&registered.api_key, model_id, prompt_messages, tool_defs, cancel.clone()).await {
            Ok(s) => s,
            // A provider can reject the request before the SSE body ever
            // opens (e.g. HTTP 429/529) — that's retryable the same as a
            // mid-stream rate limit (spec §4.4 step 4, §8 Retry bound).
            Err(Error::RateLimited { retry_after_ms }) => {
                if calls >= state.config.llm.max_retries {
                    return CallOutcome::Terminal(Error::RateLimited { retry_after_ms });
                }
                let wait_ms = backoff_ms(calls, retry_after_ms);
                let _ = tx.send(TurnEvent::Retrying { attempt: calls, wait_ms, message: "rate limited".to_owned() }).await;
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                continue;
            }
            Err(e) => return CallOutcome::Terminal(e),
        };

        match drain_stream(stream, tx, cancel).await {
            DrainOutcome::Stop { reason, in_tokens, out_tokens, text, tool_calls } => {
                return CallOutcome::Stop { reason, in_tokens, out_tokens, text, tool_calls };
            }
            DrainOutcome::Canceled => return CallOutcome::Canceled,
            DrainOutcome::Terminal(e) => return CallOutcome::Terminal(e),
            DrainOutcome::RateLimited { retry_after_ms, message } => {
                if calls >= state.config.llm.max_retries {
                    return CallOutcome::Terminal(Error::RateLimited { retry_after_ms });
                }
                let wait_ms = backoff_ms(calls, retry_after_ms);
                let _ = tx.send(TurnEvent::Retrying { attempt: calls, wait_ms, message }).await;
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
        }
    }
}

pub(crate) fn backoff_ms(attempt: u32, provider_hint_ms: Option<u64>) -> u64 {
    if let Some(ms) = provider_hint_ms {
        return ms.clamp(1_000, 60_000);
    }
    let base = 1_000u64.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..250);
    (base + jitter).clamp(1_000, 60_000)
}

enum DrainOutcome {
    Stop { reason: StopReason, in_tokens: u32, out_tokens: u32, text: String, tool_calls: Vec<(String, String, Value)> },
    RateLimited { retry_after_ms: Option<u64>, message: String },
    Canceled,
    Terminal(Error),
}

struct ToolCallBuilder {
    name: String,
    json_buf: String,
}

async fn drain_stream(mut stream: BoxStream<'static, Result<ProviderEvent>>, tx: &mpsc::Sender<TurnEvent>, cancel: &CancelToken) -> DrainOutcome {
    let mut text = String::new();
    let mut order: Vec<String> = Vec::new();
    let mut builders: HashMap<String, ToolCallBuilder> = HashMap::new();

    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            return DrainOutcome::Canceled;
        }
        match item {
            Ok(ProviderEvent::Delta { text: chunk }) => {
                let _ = tx.send(TurnEvent::Delta { text: chunk.clone() }).await;
                text.push_str(&chunk);
            }
            Ok(ProviderEvent::ToolUseStart { id, name }) => {
                order.push(id.clone());
                builders.insert(id, ToolCallBuilder { name, json_buf: String::new() });
            }
            Ok(ProviderEvent::ToolUseInput { id, json_fragment }) => {
                if let Some(b) = builders.get_mut(&id) {
                    b.json_buf.push_str(&json_fragment);
                }
            }
            Ok(ProviderEvent::ToolUseEnd { .. }) => {}
            Ok(ProviderEvent::Stop { reason, in_tokens, out_tokens, .. }) => {
                return DrainOutcome::Stop { reason, in_tokens, out_tokens, text, tool_calls: finalize_tool_calls(order, builders) };
            }
            Ok(ProviderEvent::Error { kind: ProviderErrorKind::RateLimit, retry_after_ms, message }) => {
                return DrainOutcome::RateLimited { retry_after_ms, message };
            }
            Ok(ProviderEvent::Error { kind: ProviderErrorKind::Canceled, .. }) => return DrainOutcome::Canceled,
            Ok(ProviderEvent::Error { kind: ProviderErrorKind::Other, message, .. }) => {
                return DrainOutcome::Terminal(Error::Provider { provider: "stream".into(), message });
            }
            Err(Error::RateLimited { retry_after_ms }) => {
                return DrainOutcome::RateLimited { retry_after_ms, message: "rate limited".into() };
            }
            Err(Error::Canceled) => return DrainOutcome::Canceled,
            Err(e) => return DrainOutcome::Terminal(e),
        }
    }

    // Stream ended without an explicit stop event; treat as a natural end
    // of turn with whatever accumulated so far.
    DrainOutcome::Stop { reason: StopReason::EndTurn, in_tokens: 0, out_tokens: 0, text, tool_calls: finalize_tool_calls(order, builders) }
}

fn finalize_tool_calls(order: Vec<String>, mut builders: HashMap<String, ToolCallBuilder>) -> Vec<(String, String, Value)> {
    order
        .into_iter()
        .filter_map(|id| {
            builders.remove(&id).map(|b| {
                let input = serde_json::from_str(&b.json_buf).unwrap_or_else(|_| serde_json::json!({}));
                (id, b.name, input)
            })
        })
        .collect()
}

// ── Tool dispatch (spec §4.4 step 4 "in declaration order") ─────────

async fn dispatch_tool_calls(
    state: &AppState,
    session_id: &str,
    cancel: &CancelToken,
    tool_calls: Vec<(String, String, Value)>,
    tx: &mpsc::Sender<TurnEvent>,
) -> Option<Vec<ContentBlock>> {
    let profile = state.config.tools.profile;
    let ctx = ToolContext { session_id: session_id.to_owned(), workspace_root: state.workspace_root.clone() };
    let mut results = Vec::with_capacity(tool_calls.len());

    for (id, name, input) in tool_calls {
        if cancel.is_cancelled() {
            return None;
        }

        if name == "ask_user" {
            let prompt = input.get("question").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
            let _ = tx.send(TurnEvent::AskUser { ask_id: id.clone(), prompt }).await;
            let rx = state.asks.register(&id);
            let answer = tokio::select! {
                res = rx => match res {
                    Ok(answer) => answer,
                    Err(_) => return None,
                },
                _ = wait_for_cancel(cancel) => {
                    state.asks.cancel(&id);
                    return None;
                }
            };
            results.push(ContentBlock::tool_result(id, answer, false));
            continue;
        }

        if !state.tools.is_allowed(&name, profile, &state.config.tools) {
            results.push(ContentBlock::tool_result(id, "tool disabled", true));
            continue;
        }

        let _ = tx.send(TurnEvent::ToolStart { id: id.clone(), name: name.clone() }).await;
        let output = match state.tools.execute(&name, input, &ctx).await {
            Ok(out) => out,
            Err(e) => ToolOutput::error(e.to_string()),
        };
        let _ = tx.send(TurnEvent::ToolDone { id: id.clone(), name: name.clone(), result: output.text.clone(), is_error: output.is_error }).await;
        results.push(ContentBlock::tool_result(id, output.text, output.is_error));
    }

    Some(results)
}

async fn wait_for_cancel(cancel: &CancelToken) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Titling (spec §4.4 step 5) ───────────────────────────────────────

async fn run_titling(
    state: &AppState,
    session_id: &str,
    registered: &RegisteredProvider,
    model_id: &str,
    cancel: &CancelToken,
    user_text: &str,
    assistant_text: &str,
    tx: &mpsc::Sender<TurnEvent>,
) {
    let prompt = format!(
        "Summarize this exchange. Reply with a short title (max 6 words) on the first line, \
         then a second line starting with \"tags:\" listing 2-5 comma-separated topical tags.\n\n\
         User: {user_text}\nAssistant: {assistant_text}"
    );
    let messages = vec![WireMessage::user(prompt)];

    let stream = match registered.provider.stream(&registered.api_key, model_id, &messages, &[], cancel.clone()).await {
        Ok(s) => s,
        Err(_) => return,
    };

    let (silent_tx, _silent_rx) = mpsc::channel(64);
    let outcome = tokio::time::timeout(Duration::from_secs(15), drain_stream(stream, &silent_tx, cancel)).await;
    let Ok(DrainOutcome::Stop { text, .. }) = outcome else { return };

    let mut lines = text.lines();
    let title = lines.next().unwrap_or_default().trim().trim_start_matches('#').trim().to_owned();
    if title.is_empty() {
        return;
    }
    let tags: Vec<String> = lines
        .find_map(|l| {
            l.trim()
                .strip_prefix("tags:")
                .map(|rest| rest.split(',').map(|t| t.trim().to_owned()).filter(|t| !t.is_empty()).collect())
        })
        .unwrap_or_default();

    let _ = state.sessions.update_session_title(session_id, &title);
    let _ = state.sessions.update_session_tags(session_id, tags.clone());
    let _ = tx.send(TurnEvent::Titled { title, tags }).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_respects_provider_hint_clamped() {
        assert_eq!(backoff_ms(1, Some(500)), 1_000);
        assert_eq!(backoff_ms(1, Some(120_000)), 60_000);
        assert_eq!(backoff_ms(1, Some(5_000)), 5_000);
    }

    #[test]
    fn backoff_without_hint_grows_and_is_bounded() {
        let low = backoff_ms(0, None);
        let high = backoff_ms(6, None);
        assert!(low >= 1_000 && low <= 60_000);
        assert!(high <= 60_000);
        assert!(high >= low);
    }

    #[tokio::test]
    async fn ask_registry_round_trips_an_answer() {
        let registry = AskRegistry::new();
        let rx = registry.register("ask-1");
        registry.respond("ask-1", "yes".into()).unwrap();
        assert_eq!(rx.await.unwrap(), "yes");
    }

    #[test]
    fn ask_registry_respond_to_unknown_id_is_not_found() {
        let registry = AskRegistry::new();
        let err = registry.respond("missing", "x".into()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn ask_registry_cancel_closes_receiver() {
        let registry = AskRegistry::new();
        let rx = registry.register("ask-1");
        registry.cancel("ask-1");
        assert!(rx.await.is_err());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn convert_message_maps_text_content() {
        let m = StoreMessage::new_text("s1", StoreRole::User, "hi", 0, 1);
        let wire = convert_message(&m);
        assert!(matches!(wire.role, WireRole::User));
        assert_eq!(wire.content.extract_all_text(), "hi");
    }

    #[test]
    fn convert_message_maps_tool_blocks() {
        let m = StoreMessage::new_blocks(
            "s1",
            StoreRole::Assistant,
            vec![ContentBlock::tool_use("id1", "text_echo", serde_json::json!({"text": "hi"}))],
            0,
            1,
        );
        let wire = convert_message(&m);
        match wire.content {
            WireContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(parts[0], ContentPart::ToolUse { .. }));
            }
            WireContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn turn_event_serializes_with_type_tag() {
        let ev = TurnEvent::Delta { text: "hi".into() };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "delta");
        assert_eq!(v["text"], "hi");
    }

    #[test]
    fn finalize_tool_calls_respects_declaration_order() {
        let mut builders = HashMap::new();
        builders.insert("b".to_owned(), ToolCallBuilder { name: "second".into(), json_buf: "{}".into() });
        builders.insert("a".to_owned(), ToolCallBuilder { name: "first".into(), json_buf: "{}".into() });
        let calls = finalize_tool_calls(vec!["a".into(), "b".into()], builders);
        assert_eq!(calls[0].1, "first");
        assert_eq!(calls[1].1, "second");
    }

    #[test]
    fn finalize_tool_calls_defaults_malformed_json_to_empty_object() {
        let mut builders = HashMap::new();
        builders.insert("a".to_owned(), ToolCallBuilder { name: "t".into(), json_buf: "not json".into() });
        let calls = finalize_tool_calls(vec!["a".into()], builders);
        assert_eq!(calls[0].2, serde_json::json!({}));
    }
}
