//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API streaming format, including tool
//! use assembled from `input_json_delta` fragments and the Anthropic
//! convention of putting system text in a top-level `system` field.

use crate::traits::{CancelSignal, Provider};
use crate::util::{from_reqwest, parse_retry_after_ms};
use muxd_domain::capability::LlmCapabilities;
use muxd_domain::config::ProviderConfig;
use muxd_domain::error::{Error, Result};
use muxd_domain::stream::{BoxStream, ProviderErrorKind, ProviderEvent, StopReason};
use muxd_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let capabilities = LlmCapabilities {
            supports_tools: true,
            supports_streaming: true,
            context_window_tokens: Some(200_000),
        };
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self { id: cfg.id.clone(), base_url: cfg.base_url.trim_end_matches('/').to_string(), capabilities, client })
    }

    fn authed_post(&self, url: &str, api_key: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_messages_body(&self, model_id: &str, messages: &[Message], tools: &[ToolDefinition]) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.extract_all_text()),
                Role::User => api_messages.push(user_msg_to_anthropic(msg)),
                Role::Assistant => api_messages.push(assistant_msg_to_anthropic(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": model_id,
            "messages": api_messages,
            "stream": true,
            "max_tokens": 8192,
        });
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_anthropic).collect());
        }
        body
    }
}

fn user_msg_to_anthropic(msg: &Message) -> Value {
    // A User message whose parts are ToolResult blocks is how tool
    // answers ride in the provider-agnostic wire shape; Anthropic wants
    // those as `tool_result` content blocks on a user turn too.
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({"role": "user", "content": t}),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
                    ContentPart::ToolResult { tool_use_id, content, is_error } => {
                        Some(serde_json::json!({"type": "tool_result", "tool_use_id": tool_use_id, "content": content, "is_error": is_error}))
                    }
                    ContentPart::ToolUse { .. } => None,
                })
                .collect();
            serde_json::json!({"role": "user", "content": content})
        }
    }
}

fn assistant_msg_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({"role": "assistant", "content": [{"type": "text", "text": t}]}),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
                    ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({"type": "tool_use", "id": id, "name": name, "input": input})),
                    ContentPart::ToolResult { .. } => None,
                })
                .collect();
            serde_json::json!({"role": "assistant", "content": content})
        }
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({"name": tool.name, "description": tool.description, "input_schema": tool.json_schema})
}

/// Assembles streamed tool-call argument fragments per content-block index.
#[derive(Default)]
struct StreamState {
    active_tool_calls: std::collections::HashMap<u64, String>,
    in_tokens: u32,
    out_tokens: u32,
}

fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<Result<ProviderEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };
    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let mut events = Vec::new();

    match event_type {
        "message_start" => {
            if let Some(usage) = v.get("message").and_then(|m| m.get("usage")) {
                state.in_tokens = usage.get("input_tokens").and_then(|x| x.as_u64()).unwrap_or(0) as u32;
            }
        }
        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    state.active_tool_calls.insert(idx, id.clone());
                    events.push(Ok(ProviderEvent::ToolUseStart { id, name }));
                }
            }
        }
        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|v| v.as_str()) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(ProviderEvent::Delta { text: text.to_string() }));
                            }
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(id) = state.active_tool_calls.get(&idx) {
                                events.push(Ok(ProviderEvent::ToolUseInput { id: id.clone(), json_fragment: partial.to_string() }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(id) = state.active_tool_calls.remove(&idx) {
                events.push(Ok(ProviderEvent::ToolUseEnd { id }));
            }
        }
        "message_delta" => {
            if let Some(output) = v.get("usage").and_then(|u| u.get("output_tokens")).and_then(|v| v.as_u64()) {
                state.out_tokens = output as u32;
            }
            if let Some(stop_reason) = v.get("delta").and_then(|d| d.get("stop_reason")).and_then(|v| v.as_str()) {
                events.push(Ok(ProviderEvent::Stop {
                    reason: anthropic_stop_reason(stop_reason),
                    in_tokens: state.in_tokens,
                    out_tokens: state.out_tokens,
                    cache_create: 0,
                    cache_read: 0,
                }));
            }
        }
        "error" => {
            let msg = v.get("error").and_then(|e| e.get("message")).and_then(|v| v.as_str()).unwrap_or("unknown error");
            events.push(Ok(ProviderEvent::Error { kind: ProviderErrorKind::Other, retry_after_ms: None, message: msg.to_string() }));
        }
        _ => {}
    }

    events
}

fn anthropic_stop_reason(s: &str) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn stream(
        &self,
        api_key: &str,
        model_id: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: CancelSignal,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(model_id, messages, tools);

        tracing::debug!(provider = %self.id, url = %url, "anthropic stream request");

        let resp = self.authed_post(&url, api_key).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            // 429 (rate limited) and 529 (overloaded) are retryable per spec
            // §4.4 step 4 / §8 Retry bound; everything else is terminal.
            if status.as_u16() == 429 || status.as_u16() == 529 {
                let retry_after_ms = parse_retry_after_ms(&resp);
                return Err(Error::RateLimited { retry_after_ms });
            }
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider { provider: self.id.clone(), message: format!("HTTP {} - {}", status.as_u16(), err_text) });
        }

        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, cancel, move |data| parse_anthropic_sse(data, &mut state)))
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(anthropic_stop_reason("tool_use"), StopReason::ToolUse);
        assert_eq!(anthropic_stop_reason("max_tokens"), StopReason::MaxTokens);
        assert_eq!(anthropic_stop_reason("end_turn"), StopReason::EndTurn);
    }

    #[test]
    fn content_block_start_emits_tool_use_start() {
        let mut state = StreamState::default();
        let events = parse_anthropic_sse(r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"file_read"}}"#, &mut state);
        assert_eq!(events.len(), 1);
        match events.into_iter().next().unwrap().unwrap() {
            ProviderEvent::ToolUseStart { id, name } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "file_read");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn text_delta_emits_delta_event() {
        let mut state = StreamState::default();
        let events = parse_anthropic_sse(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#, &mut state);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn message_delta_with_stop_reason_emits_stop() {
        let mut state = StreamState::default();
        let events = parse_anthropic_sse(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#, &mut state);
        assert!(matches!(events[0].as_ref().unwrap(), ProviderEvent::Stop { reason: StopReason::EndTurn, out_tokens: 42, .. }));
    }
}
