//! Anthropic adapter implementation

use super::converter::{from_anthropic_response, to_anthropic_request, DEFAULT_MAX_TOKENS};
use super::streaming::AnthropicStreamHandler;
use super::types::AnthropicResponse;
use crate::protocol::{strip_provider_prefix, ChatRequest, ChatResponse};
use crate::providers::{
    ProviderAdapter, ProviderCapabilities, ProviderError, ProviderKind, ProviderRequest,
    ProviderResult, ProviderSettings,
};
use crate::streaming::{ByteStream, StreamDecoder};
use async_trait::async_trait;

/// Default Anthropic API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Messages API version header value
pub const API_VERSION: &str = "2023-06-01";

/// Adapter for Anthropic's Messages API
#[derive(Debug)]
pub struct AnthropicAdapter {
    name: String,
    base_url: String,
    settings: ProviderSettings,
    capabilities: ProviderCapabilities,
}

impl AnthropicAdapter {
    /// Create a new Anthropic adapter. An API key is required.
    pub fn new(settings: ProviderSettings) -> ProviderResult<Self> {
        let name = settings
            .name
            .clone()
            .unwrap_or_else(|| ProviderKind::Anthropic.as_str().to_string());
        if settings.api_key_value().is_none() {
            return Err(ProviderError::configuration(&name, "an API key is required"));
        }

        Ok(Self {
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            name,
            settings,
            capabilities: ProviderCapabilities {
                supports_vision: true,
                usage_in_stream: true,
                requires_max_tokens: true,
                max_context_tokens: 200_000,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn transform_request(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> ProviderResult<ProviderRequest> {
        let max_tokens = request
            .max_tokens
            .or(self.settings.default_max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let wire = to_anthropic_request(
            &self.name,
            request,
            strip_provider_prefix(&request.model, &self.name),
            max_tokens,
            stream,
        )?;

        let body = serde_json::to_value(&wire)
            .map_err(|e| ProviderError::parse(&self.name, format!("failed to encode request: {e}")))?;

        let mut provider_request =
            ProviderRequest::new(format!("{}/v1/messages", self.base_url), body)
                .with_header("anthropic-version", API_VERSION);
        for (name, value) in &self.settings.extra_headers {
            provider_request.headers.insert(name.clone(), value.clone());
        }
        Ok(provider_request)
    }

    async fn authorize(&self, request: &mut ProviderRequest) -> ProviderResult<()> {
        let key = self.settings.api_key_value().ok_or_else(|| ProviderError::Authentication {
            provider: self.name.clone(),
            status: None,
            message: "missing API key".to_string(),
        })?;
        request.headers.insert("x-api-key".to_string(), key);
        Ok(())
    }

    fn transform_response(&self, body: &[u8]) -> ProviderResult<ChatResponse> {
        let response: AnthropicResponse = serde_json::from_slice(body).map_err(|e| {
            tracing::error!(provider = %self.name, error = %e, "failed to parse response");
            ProviderError::parse(&self.name, format!("invalid message response: {e}"))
        })?;
        Ok(from_anthropic_response(response))
    }

    fn new_stream_decoder(&self, body: ByteStream) -> StreamDecoder {
        StreamDecoder::new(body, Box::new(AnthropicStreamHandler::new(self.name.clone())))
    }
}
