//! OpenAI provider implementation
//!
//! This module provides an adapter for the OpenAI chat completions API,
//! translating between the canonical protocol and OpenAI's format. Any
//! server speaking the same wire format can be targeted through `base_url`.

mod adapter;
pub mod converter;
mod streaming;
pub mod types;

pub use adapter::{OpenAIAdapter, DEFAULT_BASE_URL};
pub use streaming::OpenAIStreamHandler;
