//! Conversion between the canonical protocol and Gemini format

use super::types::*;
use crate::protocol::{
    ChatRequest, ChatResponse, CompletionUsage, ContentPart, FinishReason, Message,
    MessageContent, MessageRole, ResponseChoice, ToolCall, ToolChoice,
};
use crate::providers::transform::{
    arguments_to_object, arguments_to_string, extract_system, parse_data_uri,
    tool_result_to_object,
};
use crate::providers::ProviderResult;

/// Convert a canonical request to Gemini format
pub fn to_gemini_request(provider: &str, request: &ChatRequest) -> ProviderResult<GeminiRequest> {
    let (system, rest) = extract_system(&request.messages);

    let mut contents: Vec<GeminiContent> = Vec::with_capacity(rest.len());
    for message in rest {
        let role = match message.role {
            MessageRole::Assistant => "model",
            _ => "user",
        };
        let parts = to_parts(provider, message)?;
        if parts.is_empty() {
            continue;
        }

        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
            _ => contents.push(GeminiContent {
                role: Some(role.to_string()),
                parts,
            }),
        }
    }

    let generation_config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        stop_sequences: request.stop.clone(),
        candidate_count: request.n,
    };
    let has_generation_config = generation_config.temperature.is_some()
        || generation_config.top_p.is_some()
        || generation_config.max_output_tokens.is_some()
        || generation_config.stop_sequences.is_some()
        || generation_config.candidate_count.is_some();

    Ok(GeminiRequest {
        contents,
        system_instruction: system.map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(text)],
        }),
        generation_config: has_generation_config.then_some(generation_config),
        tools: request.tools.as_ref().map(|tools| {
            vec![GeminiTool {
                function_declarations: tools
                    .iter()
                    .map(|tool| FunctionDeclaration {
                        name: tool.function.name.clone(),
                        description: tool.function.description.clone(),
                        parameters: tool.function.parameters.clone(),
                    })
                    .collect(),
            }]
        }),
        tool_config: request.tool_choice.as_ref().map(to_tool_config),
    })
}

fn to_parts(provider: &str, message: &Message) -> ProviderResult<Vec<GeminiPart>> {
    if message.role == MessageRole::Tool {
        let name = message
            .name
            .clone()
            .or_else(|| message.tool_call_id.clone())
            .unwrap_or_default();
        return Ok(vec![GeminiPart {
            function_response: Some(FunctionResponse {
                name,
                response: tool_result_to_object(&message.content.joined_text()),
            }),
            ..Default::default()
        }]);
    }

    let mut parts = Vec::new();
    match &message.content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                parts.push(GeminiPart::text(text.clone()));
            }
        }
        MessageContent::Parts(content) => {
            for part in content {
                match part {
                    ContentPart::Text { text } => parts.push(GeminiPart::text(text.clone())),
                    ContentPart::ImageUrl { url } => {
                        let uri = parse_data_uri(provider, url)?;
                        parts.push(GeminiPart {
                            inline_data: Some(InlineData {
                                mime_type: uri.mime_type.to_string(),
                                data: uri.data.to_string(),
                            }),
                            ..Default::default()
                        });
                    }
                }
            }
        }
    }

    if let Some(calls) = &message.tool_calls {
        for call in calls {
            parts.push(GeminiPart {
                function_call: Some(FunctionCall {
                    name: call.function.name.clone(),
                    args: arguments_to_object(&call.function.arguments),
                }),
                ..Default::default()
            });
        }
    }

    Ok(parts)
}

fn to_tool_config(choice: &ToolChoice) -> ToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Auto => ("AUTO", None),
        ToolChoice::None => ("NONE", None),
        ToolChoice::Required => ("ANY", None),
        ToolChoice::Function { name } => ("ANY", Some(vec![name.clone()])),
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode,
            allowed_function_names,
        },
    }
}

/// Normalize a Gemini finish reason
pub fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        other => FinishReason::Other(other.to_string()),
    }
}

/// Gemini has no call ids; they are synthesized from the call's position
pub(crate) fn synthetic_call_id(ordinal: usize) -> String {
    format!("call_{ordinal}")
}

/// Split a candidate's parts into text and tool calls
pub(crate) fn split_parts(parts: &[GeminiPart]) -> (String, Vec<(String, String)>) {
    let mut text = String::new();
    let mut calls = Vec::new();
    for part in parts {
        if let Some(fragment) = &part.text {
            text.push_str(fragment);
        }
        if let Some(call) = &part.function_call {
            calls.push((call.name.clone(), arguments_to_string(&call.args)));
        }
    }
    (text, calls)
}

/// Gemini reports `STOP` even when the model called a function
pub(crate) fn candidate_finish_reason(reason: Option<&str>, has_calls: bool) -> Option<FinishReason> {
    reason.map(|reason| match map_finish_reason(reason) {
        FinishReason::Stop if has_calls => FinishReason::ToolCalls,
        other => other,
    })
}

pub(crate) fn to_usage(usage: UsageMetadata) -> CompletionUsage {
    CompletionUsage::new(usage.prompt_token_count, usage.candidates_token_count)
}

/// Convert a Gemini response to canonical format
pub fn from_gemini_response(response: GeminiResponse) -> ChatResponse {
    let choices = response
        .candidates
        .iter()
        .enumerate()
        .map(|(position, candidate)| {
            let parts = candidate
                .content
                .as_ref()
                .map(|content| content.parts.as_slice())
                .unwrap_or_default();
            let (text, calls) = split_parts(parts);
            let tool_calls: Vec<ToolCall> = calls
                .into_iter()
                .enumerate()
                .map(|(ordinal, (name, arguments))| {
                    ToolCall::function(synthetic_call_id(ordinal), name, arguments)
                })
                .collect();

            ResponseChoice {
                index: candidate.index.unwrap_or(position as u32),
                finish_reason: candidate_finish_reason(
                    candidate.finish_reason.as_deref(),
                    !tool_calls.is_empty(),
                ),
                message: Message {
                    role: MessageRole::Assistant,
                    content: MessageContent::Text(text),
                    name: None,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                },
            }
        })
        .collect();

    ChatResponse {
        id: response.response_id.unwrap_or_default(),
        model: response.model_version.unwrap_or_default(),
        choices,
        usage: response.usage_metadata.map(to_usage),
    }
}
