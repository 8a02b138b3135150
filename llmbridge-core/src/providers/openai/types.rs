//! OpenAI API types
//!
//! These types match the OpenAI chat completions format and are used for
//! serialization/deserialization when talking to OpenAI-compatible servers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenAI chat completion request
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<OpenAIStreamOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAITool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// OpenAI message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<OpenAIContent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// OpenAI content (can be string or array of parts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

/// OpenAI content part for multimodal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OpenAIContentPart {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image_url")]
    ImageUrl { image_url: OpenAIImageUrl },
}

/// OpenAI image URL format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIImageUrl {
    pub url: String,
}

/// OpenAI function call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// OpenAI tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,

    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,

    pub function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

/// OpenAI tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAITool {
    #[serde(rename = "type")]
    pub tool_type: String,

    pub function: OpenAIFunction,
}

/// OpenAI function definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunction {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// OpenAI stream options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIStreamOptions {
    pub include_usage: bool,
}

/// OpenAI chat completion response
#[derive(Debug, Deserialize)]
pub struct OpenAIResponse {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub choices: Vec<OpenAIChoice>,

    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

/// OpenAI choice
#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    #[serde(default)]
    pub index: u32,

    pub message: OpenAIMessage,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// OpenAI usage information
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OpenAIUsage {
    #[serde(default)]
    pub prompt_tokens: u32,

    #[serde(default)]
    pub completion_tokens: u32,

    #[serde(default)]
    pub total_tokens: u32,
}

/// OpenAI streaming chunk
#[derive(Debug, Deserialize)]
pub struct OpenAIStreamChunk {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub choices: Vec<OpenAIStreamChoice>,

    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

/// OpenAI streaming choice
#[derive(Debug, Deserialize)]
pub struct OpenAIStreamChoice {
    #[serde(default)]
    pub index: u32,

    #[serde(default)]
    pub delta: OpenAIDelta,

    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message content in a stream
#[derive(Debug, Default, Deserialize)]
pub struct OpenAIDelta {
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

/// Tool call fragment in a stream
#[derive(Debug, Deserialize)]
pub struct OpenAIToolCallDelta {
    #[serde(default)]
    pub index: u32,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub function: Option<OpenAIFunctionDelta>,
}

/// Function fragment in a stream
#[derive(Debug, Deserialize)]
pub struct OpenAIFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub arguments: Option<String>,
}
