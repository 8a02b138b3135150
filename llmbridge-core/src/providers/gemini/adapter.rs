//! Gemini adapter implementation

use super::converter::{from_gemini_response, to_gemini_request};
use super::streaming::GeminiStreamHandler;
use super::types::GeminiResponse;
use crate::auth::TokenProvider;
use crate::protocol::{strip_provider_prefix, ChatRequest, ChatResponse};
use crate::providers::{
    ProviderAdapter, ProviderCapabilities, ProviderError, ProviderKind, ProviderRequest,
    ProviderResult, ProviderSettings,
};
use crate::streaming::{ByteStream, StreamDecoder};
use async_trait::async_trait;
use std::sync::Arc;

/// Default Generative Language API base URL
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// How requests are authenticated
#[derive(Clone)]
enum GeminiAuth {
    /// `x-goog-api-key` header
    ApiKey,
    /// `Authorization: Bearer` from a token provider, fetched per request
    Bearer(Arc<dyn TokenProvider>),
}

impl std::fmt::Debug for GeminiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeminiAuth::ApiKey => f.write_str("ApiKey"),
            GeminiAuth::Bearer(_) => f.write_str("Bearer"),
        }
    }
}

/// Adapter for Gemini `generateContent`, authenticated by API key or by a
/// service-account token provider
#[derive(Debug)]
pub struct GeminiAdapter {
    name: String,
    base_url: String,
    settings: ProviderSettings,
    auth: GeminiAuth,
    capabilities: ProviderCapabilities,
}

impl GeminiAdapter {
    /// Create a new Gemini adapter. A token provider takes precedence over
    /// an API key; one of the two is required.
    pub fn new(settings: ProviderSettings) -> ProviderResult<Self> {
        let name = settings
            .name
            .clone()
            .unwrap_or_else(|| ProviderKind::Gemini.as_str().to_string());

        let auth = match (&settings.token_provider, settings.api_key_value()) {
            (Some(provider), _) => GeminiAuth::Bearer(Arc::clone(provider)),
            (None, Some(_)) => GeminiAuth::ApiKey,
            (None, None) => {
                return Err(ProviderError::configuration(
                    &name,
                    "either an API key or a token provider is required",
                ))
            }
        };

        Ok(Self {
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            name,
            settings,
            auth,
            capabilities: ProviderCapabilities {
                supports_vision: true,
                usage_in_stream: true,
                max_context_tokens: 1_048_576,
                ..Default::default()
            },
        })
    }

    fn model_id(&self, model: &str) -> String {
        let model = strip_provider_prefix(model, &self.name);
        match model.strip_prefix("models/") {
            Some(bare) => bare.to_string(),
            None => model,
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn transform_request(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> ProviderResult<ProviderRequest> {
        let mut wire = to_gemini_request(&self.name, request)?;
        if let Some(default_max) = self.settings.default_max_tokens {
            let config = wire.generation_config.get_or_insert_with(Default::default);
            config.max_output_tokens.get_or_insert(default_max);
        }

        let body = serde_json::to_value(&wire)
            .map_err(|e| ProviderError::parse(&self.name, format!("failed to encode request: {e}")))?;

        let model = self.model_id(&request.model);
        let url = if stream {
            format!("{}/models/{model}:streamGenerateContent?alt=sse", self.base_url)
        } else {
            format!("{}/models/{model}:generateContent", self.base_url)
        };

        let mut provider_request = ProviderRequest::new(url, body);
        for (name, value) in &self.settings.extra_headers {
            provider_request.headers.insert(name.clone(), value.clone());
        }
        Ok(provider_request)
    }

    async fn authorize(&self, request: &mut ProviderRequest) -> ProviderResult<()> {
        match &self.auth {
            GeminiAuth::Bearer(provider) => {
                let token = provider.token().await?;
                request
                    .headers
                    .insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            GeminiAuth::ApiKey => {
                let key = self.settings.api_key_value().ok_or_else(|| {
                    ProviderError::Authentication {
                        provider: self.name.clone(),
                        status: None,
                        message: "missing API key".to_string(),
                    }
                })?;
                request.headers.insert("x-goog-api-key".to_string(), key);
            }
        }
        Ok(())
    }

    fn transform_response(&self, body: &[u8]) -> ProviderResult<ChatResponse> {
        let response: GeminiResponse = serde_json::from_slice(body).map_err(|e| {
            tracing::error!(provider = %self.name, error = %e, "failed to parse response");
            ProviderError::parse(&self.name, format!("invalid generateContent response: {e}"))
        })?;

        if response.candidates.is_empty() {
            if let Some(reason) = response
                .prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason.as_deref())
            {
                return Err(ProviderError::ContentPolicyViolation {
                    provider: self.name.clone(),
                    status: None,
                    message: format!("prompt blocked: {reason}"),
                });
            }
        }
        Ok(from_gemini_response(response))
    }

    fn new_stream_decoder(&self, body: ByteStream) -> StreamDecoder {
        StreamDecoder::new(body, Box::new(GeminiStreamHandler::new(self.name.clone())))
    }
}
