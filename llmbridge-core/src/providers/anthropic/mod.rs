//! Anthropic provider implementation
//!
//! Adapter for the Messages API. System prompts travel in a top-level field,
//! tool calls and results are content blocks, and streams follow a named
//! event lifecycle.

mod adapter;
pub mod converter;
mod streaming;
pub mod types;

pub use adapter::{AnthropicAdapter, API_VERSION, DEFAULT_BASE_URL};
pub use converter::DEFAULT_MAX_TOKENS;
pub use streaming::AnthropicStreamHandler;
