//! Provider adapters and the resilience engine
//!
//! This module implements the provider integration layer:
//! - [`ProviderAdapter`] and the OpenAI, Anthropic and Gemini adapters
//! - The error taxonomy every failure is classified into
//! - [`ProviderRegistry`] for routing models to adapters
//! - [`RetryExecutor`] wrapping calls with deadlines, cancellation and backoff

pub mod adapter;
pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod transform;

pub use adapter::{
    ProviderAdapter, ProviderCapabilities, ProviderKind, ProviderRequest, ProviderSettings,
};
pub use error::{
    map_error_type, map_http_error, parse_retry_after, ErrorKind, ProviderError, ProviderResult,
};
pub use registry::ProviderRegistry;
pub use retry::{RetryExecutor, RetryPolicy, MAX_BACKOFF};

// Re-export concrete adapters
pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAIAdapter;
