//! Gemini provider implementation
//!
//! Adapter for the Generative Language API (and Vertex AI through a custom
//! base URL with service-account auth). Assistant turns use the `model`
//! role, tool traffic travels as `functionCall` / `functionResponse` parts,
//! and streams send one full envelope per event.

mod adapter;
pub mod converter;
mod streaming;
pub mod types;

pub use adapter::{GeminiAdapter, DEFAULT_BASE_URL};
pub use streaming::GeminiStreamHandler;
