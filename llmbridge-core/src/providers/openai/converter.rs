//! Conversion between the canonical protocol and OpenAI format

use super::types::*;
use crate::protocol::{
    ChatRequest, ChatResponse, ChatStreamChunk, CompletionUsage, ContentPart, FinishReason,
    FunctionCall, FunctionCallDelta, Message, MessageContent, MessageDelta, MessageRole,
    ResponseChoice, StreamChoice, ToolCall, ToolCallDelta, ToolChoice, ToolDefinition,
};
use serde_json::{json, Value};

/// Convert a canonical request to OpenAI format
pub fn to_openai_request(request: &ChatRequest, model: String, stream: bool) -> OpenAIRequest {
    OpenAIRequest {
        model,
        messages: request.messages.iter().map(to_openai_message).collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        n: request.n,
        stop: request.stop.clone(),
        stream: stream.then_some(true),
        stream_options: stream.then_some(OpenAIStreamOptions {
            include_usage: true,
        }),
        tools: request
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(to_openai_tool).collect()),
        tool_choice: request.tool_choice.as_ref().map(to_openai_tool_choice),
    }
}

/// Convert a canonical message to OpenAI format
fn to_openai_message(message: &Message) -> OpenAIMessage {
    // Assistant turns that only call tools carry no content
    let content = if message.role == MessageRole::Assistant
        && message.tool_calls.is_some()
        && message.content.is_empty()
    {
        None
    } else {
        Some(to_openai_content(&message.content))
    };

    OpenAIMessage {
        role: message.role.as_str().to_string(),
        content,
        name: message.name.clone(),
        tool_calls: message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|call| OpenAIToolCall {
                    id: call.id.clone(),
                    tool_type: call.tool_type.clone(),
                    function: OpenAIFunctionCall {
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// Convert message content to OpenAI format. Image URLs pass through unchanged.
fn to_openai_content(content: &MessageContent) -> OpenAIContent {
    match content {
        MessageContent::Text(text) => OpenAIContent::Text(text.clone()),
        MessageContent::Parts(parts) => OpenAIContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => OpenAIContentPart::Text { text: text.clone() },
                    ContentPart::ImageUrl { url } => OpenAIContentPart::ImageUrl {
                        image_url: OpenAIImageUrl { url: url.clone() },
                    },
                })
                .collect(),
        ),
    }
}

/// Convert a tool definition to OpenAI format
fn to_openai_tool(tool: &ToolDefinition) -> OpenAITool {
    OpenAITool {
        tool_type: tool.tool_type.clone(),
        function: OpenAIFunction {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: tool.function.parameters.clone(),
        },
    }
}

/// Convert a tool choice to OpenAI format
fn to_openai_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function { name } => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

/// Normalize an OpenAI finish reason
pub fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

fn map_role(role: &str) -> MessageRole {
    match role {
        "system" | "developer" => MessageRole::System,
        "user" => MessageRole::User,
        "tool" => MessageRole::Tool,
        _ => MessageRole::Assistant,
    }
}

/// Convert an OpenAI response to canonical format
pub fn from_openai_response(response: OpenAIResponse) -> ChatResponse {
    ChatResponse {
        id: response.id,
        model: response.model,
        choices: response
            .choices
            .into_iter()
            .map(from_openai_choice)
            .collect(),
        usage: response.usage.map(from_openai_usage),
    }
}

fn from_openai_choice(choice: OpenAIChoice) -> ResponseChoice {
    ResponseChoice {
        index: choice.index,
        message: from_openai_message(choice.message),
        finish_reason: choice.finish_reason.as_deref().map(map_finish_reason),
    }
}

fn from_openai_message(message: OpenAIMessage) -> Message {
    let content = match message.content {
        Some(OpenAIContent::Text(text)) => MessageContent::Text(text),
        Some(OpenAIContent::Parts(parts)) => MessageContent::Parts(
            parts
                .into_iter()
                .map(|part| match part {
                    OpenAIContentPart::Text { text } => ContentPart::Text { text },
                    OpenAIContentPart::ImageUrl { image_url } => {
                        ContentPart::ImageUrl { url: image_url.url }
                    }
                })
                .collect(),
        ),
        None => MessageContent::Text(String::new()),
    };

    Message {
        role: map_role(&message.role),
        content,
        name: message.name,
        tool_calls: message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    tool_type: call.tool_type,
                    function: FunctionCall {
                        name: call.function.name,
                        arguments: call.function.arguments,
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id,
    }
}

fn from_openai_usage(usage: OpenAIUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

/// Convert an OpenAI streaming chunk to canonical format
pub fn from_openai_stream_chunk(chunk: OpenAIStreamChunk) -> ChatStreamChunk {
    ChatStreamChunk {
        id: chunk.id,
        model: chunk.model,
        choices: chunk
            .choices
            .into_iter()
            .map(from_openai_stream_choice)
            .collect(),
        usage: chunk.usage.map(from_openai_usage),
    }
}

fn from_openai_stream_choice(choice: OpenAIStreamChoice) -> StreamChoice {
    StreamChoice {
        index: choice.index,
        delta: from_openai_delta(choice.delta),
        finish_reason: choice.finish_reason.as_deref().map(map_finish_reason),
    }
}

fn from_openai_delta(delta: OpenAIDelta) -> MessageDelta {
    MessageDelta {
        role: delta.role.as_deref().map(map_role),
        content: delta.content,
        tool_calls: delta.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| ToolCallDelta {
                    index: call.index,
                    id: call.id,
                    function: call.function.map(|function| FunctionCallDelta {
                        name: function.name,
                        arguments: function.arguments,
                    }),
                })
                .collect()
        }),
    }
}
