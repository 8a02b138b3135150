//! llmbridge core library
//!
//! One canonical chat request, translated to and from OpenAI-style,
//! Anthropic and Gemini wire protocols, for single-shot and streamed
//! responses. The main entry point is [`Client`]:
//!
//! ```no_run
//! use llmbridge_core::{ChatRequest, Client, Message};
//! use llmbridge_core::providers::{OpenAIAdapter, ProviderSettings};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let openai = OpenAIAdapter::new(ProviderSettings::new().with_api_key("sk-..."))?;
//! let client = Client::builder().with_provider(Arc::new(openai)).build()?;
//!
//! let request = ChatRequest::new("gpt-4o", vec![Message::user("Hello!")]);
//! let response = client
//!     .completion(&request, &CancellationToken::new(), None)
//!     .await?;
//! println!("{:?}", response.choices[0].message.content);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod callbacks;
pub mod client;
pub mod config;
pub mod cost;
pub mod http;
pub mod protocol;
pub mod providers;
pub mod streaming;

pub use client::{Client, ClientBuilder, CompletionStream};
pub use protocol::{
    CallMetadata, ChatRequest, ChatResponse, ChatStreamChunk, CompletionUsage, FinishReason,
    Message, MessageRole,
};
pub use providers::{ErrorKind, ProviderError, ProviderResult};

/// Returns the version of the llmbridge core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
