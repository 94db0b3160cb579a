use muxd_domain::cancel::CancelToken;
use muxd_domain::capability::LlmCapabilities;
use muxd_domain::error::Result;
use muxd_domain::stream::{BoxStream, ProviderEvent};
use muxd_domain::tool::{Message, ToolDefinition};

/// Cancellation signal propagated into a Provider's transport. The Agent
/// Loop's per-turn `CancelToken` is checked by the stream adapter so an
/// in-flight HTTP request is dropped, not merely ignored.
pub type CancelSignal = CancelToken;

/// Every LLM adapter implements this: a name and a single streaming
/// entrypoint. There is no separate non-streaming `chat()` — the Agent
/// Loop always consumes the stream, even for providers that buffer their
/// whole response before emitting it (see spec §4.2).
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// A unique identifier for this provider instance (the configured
    /// `ProviderConfig::id`, not the upstream vendor name).
    fn name(&self) -> &str;

    /// Stream a chat completion. `api_key` is resolved by the caller
    /// (Registry) so individual adapters never read `AuthConfig`
    /// themselves.
    async fn stream(
        &self,
        api_key: &str,
        model_id: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: CancelSignal,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>>;

    /// The advertised capabilities of this provider/model combination.
    fn capabilities(&self) -> &LlmCapabilities;
}
