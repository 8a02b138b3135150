//! Protocol module for LLM request/response structures
//!
//! This module defines the canonical data models every provider adapter
//! speaks. These structures are designed to be:
//! - Provider-agnostic
//! - Immutable once handed to an adapter
//! - Incrementally consumable when streamed
//! - Type-safe and serializable

pub mod metadata;
pub mod types;

pub use metadata::CallMetadata;
pub use types::{
    strip_provider_prefix, ChatRequest, ChatResponse, ChatStreamChunk, CompletionUsage,
    ContentPart, FinishReason, FunctionCall, FunctionCallDelta, FunctionDefinition, Message,
    MessageBuilder, MessageContent, MessageDelta, MessageRole, RequestValidationError,
    ResponseChoice, StreamChoice, ToolCall, ToolCallDelta, ToolChoice, ToolDefinition,
};
