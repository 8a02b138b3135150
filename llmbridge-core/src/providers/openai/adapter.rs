//! OpenAI adapter implementation

use super::converter::{from_openai_response, to_openai_request};
use super::streaming::OpenAIStreamHandler;
use super::types::OpenAIResponse;
use crate::protocol::{strip_provider_prefix, ChatRequest, ChatResponse};
use crate::providers::{
    ProviderAdapter, ProviderCapabilities, ProviderError, ProviderKind, ProviderRequest,
    ProviderResult, ProviderSettings,
};
use crate::streaming::{ByteStream, StreamDecoder};
use async_trait::async_trait;

/// Default OpenAI API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for OpenAI and OpenAI-compatible chat completion APIs
#[derive(Debug)]
pub struct OpenAIAdapter {
    name: String,
    base_url: String,
    settings: ProviderSettings,
    capabilities: ProviderCapabilities,
}

impl OpenAIAdapter {
    /// Create a new OpenAI adapter. A missing API key is allowed for
    /// compatible servers that do not authenticate.
    pub fn new(settings: ProviderSettings) -> ProviderResult<Self> {
        Ok(Self {
            name: settings
                .name
                .clone()
                .unwrap_or_else(|| ProviderKind::OpenAI.as_str().to_string()),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            settings,
            capabilities: ProviderCapabilities {
                supports_vision: true,
                usage_in_stream: true,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn transform_request(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> ProviderResult<ProviderRequest> {
        let mut wire = to_openai_request(
            request,
            strip_provider_prefix(&request.model, &self.name),
            stream,
        );
        if wire.max_tokens.is_none() {
            wire.max_tokens = self.settings.default_max_tokens;
        }

        let body = serde_json::to_value(&wire)
            .map_err(|e| ProviderError::parse(&self.name, format!("failed to encode request: {e}")))?;

        let mut provider_request =
            ProviderRequest::new(format!("{}/chat/completions", self.base_url), body);
        for (name, value) in &self.settings.extra_headers {
            provider_request.headers.insert(name.clone(), value.clone());
        }
        Ok(provider_request)
    }

    async fn authorize(&self, request: &mut ProviderRequest) -> ProviderResult<()> {
        if let Some(key) = self.settings.api_key_value() {
            request
                .headers
                .insert("Authorization".to_string(), format!("Bearer {key}"));
        }
        Ok(())
    }

    fn transform_response(&self, body: &[u8]) -> ProviderResult<ChatResponse> {
        let response: OpenAIResponse = serde_json::from_slice(body).map_err(|e| {
            tracing::error!(provider = %self.name, error = %e, "failed to parse response");
            ProviderError::parse(&self.name, format!("invalid chat completion: {e}"))
        })?;
        Ok(from_openai_response(response))
    }

    fn new_stream_decoder(&self, body: ByteStream) -> StreamDecoder {
        StreamDecoder::new(body, Box::new(OpenAIStreamHandler::new(self.name.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ContentPart, Message, MessageBuilder, MessageRole};

    fn adapter() -> OpenAIAdapter {
        OpenAIAdapter::new(ProviderSettings::new().with_api_key("sk-test")).unwrap()
    }

    #[test]
    fn builds_chat_completions_request() {
        let request = ChatRequest::new("openai/gpt-4o", vec![Message::user("Hello")])
            .with_temperature(0.2);
        let wire = adapter().transform_request(&request, false).unwrap();

        assert_eq!(wire.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(wire.body["model"], "gpt-4o");
        assert_eq!(wire.body["messages"][0]["role"], "user");
        assert_eq!(wire.body["messages"][0]["content"], "Hello");
        assert!(wire.body.get("stream").is_none());
        assert_eq!(request.model, "openai/gpt-4o");
    }

    #[test]
    fn stream_requests_usage() {
        let request = ChatRequest::new("gpt-4o", vec![Message::user("Hello")]);
        let wire = adapter().transform_request(&request, true).unwrap();
        assert_eq!(wire.body["stream"], true);
        assert_eq!(wire.body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn image_urls_pass_through() {
        let message = MessageBuilder::with_parts(
            MessageRole::User,
            vec![
                ContentPart::Text {
                    text: "what is this".into(),
                },
                ContentPart::ImageUrl {
                    url: "https://example.com/cat.png".into(),
                },
            ],
        )
        .build();
        let wire = adapter()
            .transform_request(&ChatRequest::new("gpt-4o", vec![message]), false)
            .unwrap();
        assert_eq!(
            wire.body["messages"][0]["content"][1]["image_url"]["url"],
            "https://example.com/cat.png"
        );
    }

    #[tokio::test]
    async fn authorize_sets_bearer_header() {
        let adapter = adapter();
        let mut wire = adapter
            .transform_request(&ChatRequest::new("gpt-4o", vec![Message::user("x")]), false)
            .unwrap();
        adapter.authorize(&mut wire).await.unwrap();
        assert_eq!(wire.header("Authorization"), Some("Bearer sk-test"));
    }

    #[test]
    fn parses_response() {
        let body = br#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }"#;
        let response = adapter().transform_response(body).unwrap();
        assert_eq!(response.text(), Some("Hi there"));
        assert_eq!(response.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn invalid_body_is_parse_error() {
        let err = adapter().transform_response(b"<html>").unwrap_err();
        assert_eq!(err.kind(), crate::providers::ErrorKind::Parse);
    }
}
