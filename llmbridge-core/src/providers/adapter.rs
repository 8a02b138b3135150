//! Provider adapter trait and capabilities
//!
//! Defines the fixed method set every provider integration implements. An
//! adapter is immutable after construction and shared across calls; the only
//! per-call state lives in the [`ProviderRequest`] it builds and the
//! [`StreamDecoder`] it hands out.

use super::error::{map_http_error, ProviderError, ProviderResult};
use crate::auth::TokenProvider;
use crate::config::SecretString;
use crate::protocol::{ChatRequest, ChatResponse};
use crate::streaming::{ByteStream, StreamDecoder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Core trait all provider integrations implement
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry name of this adapter
    fn name(&self) -> &str;

    /// Which protocol family the adapter speaks
    fn kind(&self) -> ProviderKind;

    /// Static capability flags
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Translate a canonical request into the vendor's wire request
    fn transform_request(&self, request: &ChatRequest, stream: bool)
        -> ProviderResult<ProviderRequest>;

    /// Attach credentials. Runs before every HTTP attempt.
    async fn authorize(&self, request: &mut ProviderRequest) -> ProviderResult<()>;

    /// Translate a vendor response body into the canonical response
    fn transform_response(&self, body: &[u8]) -> ProviderResult<ChatResponse>;

    /// Classify a non-success HTTP answer
    fn map_error(&self, status: u16, body: &str) -> ProviderError {
        map_http_error(self.name(), status, None, body)
    }

    /// Wrap a streaming response body in a decoder speaking this vendor's grammar
    fn new_stream_decoder(&self, body: ByteStream) -> StreamDecoder;
}

/// A vendor request ready for transport
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    /// Absolute endpoint URL
    pub url: String,

    /// Headers to send, in addition to the transport's defaults
    pub headers: HashMap<String, String>,

    /// JSON body
    pub body: Value,
}

impl ProviderRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            body,
        }
    }

    /// Add or replace a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Look up a header by exact name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Provider capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Does the provider accept system instructions?
    pub supports_system_role: bool,

    /// Does the provider support function calling?
    pub supports_tools: bool,

    /// Does the provider support streaming?
    pub supports_streaming: bool,

    /// Does the provider accept image parts?
    pub supports_vision: bool,

    /// Does the stream report token usage at the end?
    pub usage_in_stream: bool,

    /// Must every request carry `max_tokens`?
    pub requires_max_tokens: bool,

    /// Maximum context window size
    pub max_context_tokens: usize,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_system_role: true,
            supports_tools: true,
            supports_streaming: true,
            supports_vision: false,
            usage_in_stream: false,
            requires_max_tokens: false,
            max_context_tokens: 128_000,
        }
    }
}

/// Closed set of supported provider protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    #[serde(alias = "google")]
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Create an adapter instance for this kind
    pub fn create_adapter(
        &self,
        settings: ProviderSettings,
    ) -> ProviderResult<Box<dyn ProviderAdapter>> {
        Ok(match self {
            ProviderKind::OpenAI => Box::new(super::openai::OpenAIAdapter::new(settings)?),
            ProviderKind::Anthropic => Box::new(super::anthropic::AnthropicAdapter::new(settings)?),
            ProviderKind::Gemini => Box::new(super::gemini::GeminiAdapter::new(settings)?),
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            other => Err(ProviderError::configuration(
                other,
                format!("unknown provider kind '{other}'"),
            )),
        }
    }
}

/// Construction inputs shared by all adapters
#[derive(Clone, Default)]
pub struct ProviderSettings {
    /// Registry name; defaults to the kind's name
    pub name: Option<String>,

    /// Override the vendor's default base URL
    pub base_url: Option<String>,

    /// Static API key
    pub api_key: Option<SecretString>,

    /// Bearer token source (Gemini service accounts)
    pub token_provider: Option<Arc<dyn TokenProvider>>,

    /// Output cap applied when the request leaves `max_tokens` unset
    pub default_max_tokens: Option<u32>,

    /// Extra headers sent on every request
    pub extra_headers: HashMap<String, String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("token_provider", &self.token_provider.is_some())
            .field("default_max_tokens", &self.default_max_tokens)
            .field("extra_headers", &self.extra_headers)
            .finish()
    }
}

impl ProviderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = Some(max_tokens);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    /// Base URL with any trailing slash removed
    pub(crate) fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    /// Non-empty API key, if configured
    pub(crate) fn api_key_value(&self) -> Option<String> {
        self.api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .map(|key| key.expose_secret().to_string())
    }
}
