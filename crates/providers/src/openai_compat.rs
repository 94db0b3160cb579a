//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, Together, and any other
//! endpoint that follows the OpenAI chat completions contract.

use crate::traits::{CancelSignal, Provider};
use crate::util::{from_reqwest, parse_retry_after_ms};
use muxd_domain::capability::LlmCapabilities;
use muxd_domain::config::ProviderConfig;
use muxd_domain::error::{Error, Result};
use muxd_domain::stream::{BoxStream, ProviderErrorKind, ProviderEvent, StopReason};
use muxd_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use serde_json::Value;

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    auth_header: String,
    auth_prefix: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let auth_header = cfg.auth.header.clone().unwrap_or_else(|| "Authorization".into());
        let auth_prefix = cfg.auth.prefix.clone().unwrap_or_else(|| "Bearer ".into());

        let capabilities = LlmCapabilities {
            supports_tools: true,
            supports_streaming: true,
            context_window_tokens: Some(128_000),
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            auth_header,
            auth_prefix,
            capabilities,
            client,
        })
    }

    fn authed_post(&self, url: &str, api_key: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url).header("Content-Type", "application/json");
        if !api_key.is_empty() {
            let header_value = format!("{}{}", self.auth_prefix, api_key);
            builder = builder.header(&self.auth_header, &header_value);
        }
        builder
    }

    fn build_chat_body(&self, model_id: &str, messages: &[Message], tools: &[ToolDefinition]) -> Value {
        let wire_messages: Vec<Value> = messages.iter().map(msg_to_openai).collect();
        let mut body = serde_json::json!({
            "model": model_id,
            "messages": wire_messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_openai).collect());
        }
        body
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => assistant_to_openai(msg),
        _ => {
            // Tool results ride in as a User message whose first part is a
            // ToolResult — OpenAI needs those split out into `role: tool`.
            if let MessageContent::Parts(parts) = &msg.content {
                if let Some(ContentPart::ToolResult { tool_use_id, content, .. }) = parts.first() {
                    return serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    });
                }
            }
            serde_json::json!({
                "role": role_to_str(msg.role),
                "content": msg.content.extract_all_text(),
            })
        }
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": input.to_string()},
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() { Value::Null } else { Value::String(text_parts.join("\n")) };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.json_schema,
        }
    })
}

fn stop_reason_from_finish(fr: &str) -> StopReason {
    match fr {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

/// Per-stream state tracking which tool-call index maps to which `id`, so
/// argument-fragment deltas (keyed by index, not id, by the OpenAI wire
/// format) can be routed to the right `tool_use_input` event.
#[derive(Default)]
struct StreamState {
    index_to_id: std::collections::HashMap<u64, String>,
    usage: Option<(u32, u32)>,
}

fn parse_sse_data(data: &str, state: &mut StreamState) -> Vec<Result<ProviderEvent>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    if let Some(usage) = v.get("usage") {
        if let (Some(p), Some(c)) = (usage.get("prompt_tokens").and_then(|x| x.as_u64()), usage.get("completion_tokens").and_then(|x| x.as_u64())) {
            state.usage = Some((p as u32, c as u32));
        }
    }

    let choice = match v.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first()) {
        Some(c) => c,
        None => return Vec::new(),
    };

    let mut events = Vec::new();
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let idx = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = tc.get("function").and_then(|f| f.get("name")).and_then(|v| v.as_str()).unwrap_or("");
                state.index_to_id.insert(idx, id.to_string());
                events.push(Ok(ProviderEvent::ToolUseStart { id: id.to_string(), name: name.to_string() }));
            }
            if let Some(args) = tc.get("function").and_then(|f| f.get("arguments")).and_then(|v| v.as_str()) {
                if let Some(id) = state.index_to_id.get(&idx) {
                    events.push(Ok(ProviderEvent::ToolUseInput { id: id.clone(), json_fragment: args.to_string() }));
                }
            }
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(ProviderEvent::Delta { text: text.to_string() }));
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        for id in state.index_to_id.values() {
            events.push(Ok(ProviderEvent::ToolUseEnd { id: id.clone() }));
        }
        let (in_tokens, out_tokens) = state.usage.unwrap_or((0, 0));
        events.push(Ok(ProviderEvent::Stop {
            reason: stop_reason_from_finish(fr),
            in_tokens,
            out_tokens,
            cache_create: 0,
            cache_read: 0,
        }));
    }

    events
}

#[async_trait::async_trait]
impl Provider for OpenAiCompatProvider {
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(model_id, messages, tools);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat stream request");

        let resp = self.authed_post(&url, api_key).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            // 429 is retryable per spec §4.4 step 4 / §8 Retry bound;
            // everything else is terminal.
            if status.as_u16() == 429 {
                let retry_after_ms = parse_retry_after_ms(&resp);
                return Err(Error::RateLimited { retry_after_ms });
            }
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider { provider: self.id.clone(), message: format!("HTTP {} - {}", status.as_u16(), err_text) });
        }

        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, cancel, move |data| parse_sse_data(data, &mut state)))
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_finish_reason_maps_to_tool_use() {
        assert_eq!(stop_reason_from_finish("tool_calls"), StopReason::ToolUse);
        assert_eq!(stop_reason_from_finish("stop"), StopReason::EndTurn);
        assert_eq!(stop_reason_from_finish("length"), StopReason::MaxTokens);
    }

    #[test]
    fn parse_sse_data_emits_delta() {
        let mut state = StreamState::default();
        let events = parse_sse_data(r#"{"choices":[{"delta":{"content":"hi"}}]}"#, &mut state);
        assert_eq!(events.len(), 1);
        match events.into_iter().next().unwrap().unwrap() {
            ProviderEvent::Delta { text } => assert_eq!(text, "hi"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_sse_data_done_sentinel_yields_nothing() {
        let mut state = StreamState::default();
        assert!(parse_sse_data("[DONE]", &mut state).is_empty());
    }

    #[test]
    fn parse_sse_data_finish_reason_emits_stop() {
        let mut state = StreamState::default();
        let events = parse_sse_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#, &mut state);
        assert!(matches!(events.last().unwrap().as_ref().unwrap(), ProviderEvent::Stop { reason: StopReason::EndTurn, .. }));
    }
}
