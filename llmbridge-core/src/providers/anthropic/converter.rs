//! Conversion between the canonical protocol and Anthropic format

use super::types::*;
use crate::protocol::{
    ChatRequest, ChatResponse, CompletionUsage, ContentPart, FinishReason, Message,
    MessageContent, MessageRole, ResponseChoice, ToolCall, ToolChoice,
};
use crate::providers::transform::{
    arguments_to_object, arguments_to_string, extract_system, parse_data_uri,
};
use crate::providers::ProviderResult;
use serde_json::json;

/// Output cap used when neither the request nor the settings provide one
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Convert a canonical request to Anthropic format
pub fn to_anthropic_request(
    provider: &str,
    request: &ChatRequest,
    model: String,
    max_tokens: u32,
    stream: bool,
) -> ProviderResult<AnthropicRequest> {
    let (system, rest) = extract_system(&request.messages);

    let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(rest.len());
    for message in rest {
        let role = match message.role {
            MessageRole::Assistant => "assistant",
            _ => "user",
        };
        let blocks = to_content_blocks(provider, message)?;
        if blocks.is_empty() {
            continue;
        }

        // The API wants alternating turns; fold runs of one role together
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }

    Ok(AnthropicRequest {
        model,
        messages,
        max_tokens,
        system,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone(),
        stream: stream.then_some(true),
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| AnthropicTool {
                    name: tool.function.name.clone(),
                    description: tool.function.description.clone(),
                    input_schema: tool
                        .function
                        .parameters
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().map(to_anthropic_tool_choice),
    })
}

fn to_content_blocks(provider: &str, message: &Message) -> ProviderResult<Vec<ContentBlock>> {
    if message.role == MessageRole::Tool {
        return Ok(vec![ContentBlock::ToolResult {
            tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
            content: message.content.joined_text(),
        }]);
    }

    let mut blocks = Vec::new();
    match &message.content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text: text.clone() });
            }
        }
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        blocks.push(ContentBlock::Text { text: text.clone() })
                    }
                    ContentPart::ImageUrl { url } => {
                        let uri = parse_data_uri(provider, url)?;
                        blocks.push(ContentBlock::Image {
                            source: ImageSource {
                                source_type: "base64",
                                media_type: uri.mime_type.to_string(),
                                data: uri.data.to_string(),
                            },
                        });
                    }
                }
            }
        }
    }

    if let Some(calls) = &message.tool_calls {
        for call in calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: arguments_to_object(&call.function.arguments),
            });
        }
    }

    Ok(blocks)
}

fn to_anthropic_tool_choice(choice: &ToolChoice) -> AnthropicToolChoice {
    let (choice_type, name) = match choice {
        ToolChoice::Auto => ("auto", None),
        ToolChoice::None => ("none", None),
        ToolChoice::Required => ("any", None),
        ToolChoice::Function { name } => ("tool", Some(name.clone())),
    };
    AnthropicToolChoice { choice_type, name }
}

/// Normalize an Anthropic stop reason
pub fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Convert an Anthropic response to canonical format
pub fn from_anthropic_response(response: AnthropicResponse) -> ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block.block_type.as_str() {
            "text" => text.push_str(block.text.as_deref().unwrap_or_default()),
            "tool_use" => tool_calls.push(ToolCall::function(
                block.id.unwrap_or_default(),
                block.name.unwrap_or_default(),
                arguments_to_string(&block.input.unwrap_or_default()),
            )),
            _ => {}
        }
    }

    let message = Message {
        role: MessageRole::Assistant,
        content: MessageContent::Text(text),
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    };

    ChatResponse {
        id: response.id,
        model: response.model,
        choices: vec![ResponseChoice {
            index: 0,
            message,
            finish_reason: response.stop_reason.as_deref().map(map_stop_reason),
        }],
        usage: response
            .usage
            .map(|usage| CompletionUsage::new(usage.input_tokens, usage.output_tokens)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageBuilder, ToolDefinition};
    use test_case::test_case;

    #[test_case("end_turn", FinishReason::Stop)]
    #[test_case("stop_sequence", FinishReason::Stop)]
    #[test_case("max_tokens", FinishReason::Length)]
    #[test_case("tool_use", FinishReason::ToolCalls)]
    #[test_case("refusal", FinishReason::ContentFilter)]
    #[test_case("pause_turn", FinishReason::Other("pause_turn".into()))]
    fn stop_reasons(raw: &str, expected: FinishReason) {
        assert_eq!(map_stop_reason(raw), expected);
    }

    #[test]
    fn empty_turns_are_dropped() {
        let request = ChatRequest::new(
            "claude",
            vec![
                Message::user("Hi"),
                Message::assistant(""),
                Message::user("Still there?"),
            ],
        );

        let wire = to_anthropic_request("anthropic", &request, "claude".into(), 100, false).unwrap();
        let json = serde_json::to_value(&wire).unwrap();

        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn tool_results_are_merged_into_one_user_turn() {
        let assistant = MessageBuilder::new(MessageRole::Assistant, "")
            .with_tool_calls(vec![
                ToolCall::function("toolu_1", "weather", r#"{"city":"Paris"}"#),
                ToolCall::function("toolu_2", "weather", "not json"),
            ])
            .build();
        let request = ChatRequest::new(
            "claude",
            vec![
                Message::user("Weather in Paris and Rome?"),
                assistant,
                Message::tool("toolu_1", "weather", "18C"),
                Message::tool("toolu_2", "weather", "24C"),
            ],
        )
        .with_tools(vec![ToolDefinition::function("weather", None, None)]);

        let wire = to_anthropic_request("anthropic", &request, "claude".into(), 100, false).unwrap();
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["messages"].as_array().unwrap().len(), 3);
        assert_eq!(json["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(json["messages"][1]["content"][0]["input"]["city"], "Paris");
        assert_eq!(json["messages"][1]["content"][1]["input"]["raw"], "not json");
        assert_eq!(json["messages"][2]["role"], "user");
        assert_eq!(json["messages"][2]["content"][1]["tool_use_id"], "toolu_2");
        assert_eq!(json["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn forced_tool_choice() {
        let choice = to_anthropic_tool_choice(&ToolChoice::Function {
            name: "weather".into(),
        });
        assert_eq!(choice.choice_type, "tool");
        assert_eq!(choice.name.as_deref(), Some("weather"));
        assert_eq!(to_anthropic_tool_choice(&ToolChoice::Required).choice_type, "any");
    }

    #[test]
    fn response_with_tool_use() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "model": "claude-3-5-sonnet",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Paris"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        }))
        .unwrap();

        let response = from_anthropic_response(response);
        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.text(), Some("Checking."));
        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"city":"Paris"}"#);
        assert_eq!(response.usage.unwrap().total_tokens, 14);
    }
}
