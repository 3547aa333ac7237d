use async_trait::async_trait;

use bs_domain::chat::{ChatMessage, ChatResponse, SystemBlock, ToolDefinition};
use bs_domain::stream::{BoxStream, StreamEvent};
use bs_domain::Result;

/// The provider-facing request, already resolved by the router: no roles or
/// model ids here, just the concrete model name and the conversation.
#[derive(Debug, Clone, Default)]
pub struct AdapterRequest {
    pub system: Vec<SystemBlock>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

/// Trait every provider adapter implements. Adapters translate between the
/// internal content-block model and the provider's wire format; they do not
/// retry, fall back, or track breakers (the router does).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Non-streaming completion. The returned response is already validated.
    async fn chat(&self, model_name: &str, req: &AdapterRequest) -> Result<ChatResponse>;

    /// Streaming completion: zero or more `text_delta` events followed by
    /// exactly one `message_done` whose response passes the same validation
    /// as [`ProviderAdapter::chat`].
    async fn chat_stream(
        &self,
        model_name: &str,
        req: &AdapterRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// The provider key this adapter was built for.
    fn provider_key(&self) -> &str;
}
