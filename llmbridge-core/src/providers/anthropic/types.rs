//! Anthropic Messages API types
//!
//! These types mirror Anthropic's wire format for `POST /v1/messages`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Request types
// ============================================================================

/// Top-level request body
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<AnthropicToolChoice>,
}

/// A single message in the conversation
#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<ContentBlock>,
}

/// A content block within a request message
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Base64-encoded image source
#[derive(Debug, Serialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: &'static str,
    pub media_type: String,
    pub data: String,
}

/// Tool definition
#[derive(Debug, Serialize)]
pub struct AnthropicTool {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub input_schema: Value,
}

/// Tool choice directive
#[derive(Debug, Serialize)]
pub struct AnthropicToolChoice {
    #[serde(rename = "type")]
    pub choice_type: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ============================================================================
// Response types
// ============================================================================

/// Response from `POST /v1/messages`
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub content: Vec<ResponseBlock>,

    #[serde(default)]
    pub stop_reason: Option<String>,

    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// A content block in a response
#[derive(Debug, Deserialize)]
pub struct ResponseBlock {
    #[serde(rename = "type")]
    pub block_type: String,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub input: Option<Value>,
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,

    #[serde(default)]
    pub output_tokens: u32,
}

// ============================================================================
// Streaming types
// ============================================================================

/// One SSE payload, keyed by its `type` discriminator
#[derive(Debug, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,

    /// Content block index (`content_block_*`)
    #[serde(default)]
    pub index: Option<u32>,

    /// Opening block (`content_block_start`)
    #[serde(default)]
    pub content_block: Option<ResponseBlock>,

    /// Incremental payload (`content_block_delta`, `message_delta`)
    #[serde(default)]
    pub delta: Option<StreamDelta>,

    /// Message envelope (`message_start`)
    #[serde(default)]
    pub message: Option<StreamMessage>,

    /// Output usage (`message_delta`)
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,

    /// Error body (`error`)
    #[serde(default)]
    pub error: Option<StreamError>,
}

/// Delta content within streaming events
#[derive(Debug, Deserialize)]
pub struct StreamDelta {
    #[serde(rename = "type", default)]
    pub delta_type: Option<String>,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub partial_json: Option<String>,

    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Message metadata from `message_start`
#[derive(Debug, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// Error detail carried by an `error` event
#[derive(Debug, Deserialize)]
pub struct StreamError {
    #[serde(rename = "type", default)]
    pub error_type: String,

    #[serde(default)]
    pub message: String,
}
