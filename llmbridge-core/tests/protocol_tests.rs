//! Cross-provider translation tests
//!
//! One canonical tool-calling conversation is rendered by every adapter, and
//! each vendor's response shape is folded back into the same canonical form.

use llmbridge_core::protocol::{ContentPart, MessageBuilder, ToolCall, ToolChoice, ToolDefinition};
use llmbridge_core::providers::{
    AnthropicAdapter, ErrorKind, GeminiAdapter, OpenAIAdapter, ProviderAdapter, ProviderSettings,
};
use llmbridge_core::{ChatRequest, FinishReason, Message, MessageRole};
use serde_json::{json, Value};
use test_case::test_case;

fn conversation() -> ChatRequest {
    let call = ToolCall::function("call_1", "get_weather", r#"{"city":"Paris"}"#);
    ChatRequest::new(
        "weather-model",
        vec![
            Message::system("You are a weather bot."),
            Message::user("Weather in Paris?"),
            MessageBuilder::new(MessageRole::Assistant, "")
                .with_tool_calls(vec![call])
                .build(),
            Message::tool("call_1", "get_weather", "18C and sunny"),
        ],
    )
    .with_temperature(0.2)
    .with_max_tokens(256)
    .with_tools(vec![ToolDefinition::function(
        "get_weather",
        Some("Current weather for a city".to_string()),
        Some(json!({"type": "object", "properties": {"city": {"type": "string"}}})),
    )])
    .with_tool_choice(ToolChoice::Required)
}

fn settings() -> ProviderSettings {
    ProviderSettings::new().with_api_key("test-key")
}

fn body(adapter: &dyn ProviderAdapter, request: &ChatRequest) -> Value {
    adapter.transform_request(request, false).unwrap().body
}

/// OpenAI keeps the conversation shape and passes arguments as strings
#[test]
fn test_openai_wire_request() {
    let adapter = OpenAIAdapter::new(settings()).unwrap();
    let body = body(&adapter, &conversation());

    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "system");
    assert!(messages[2].get("content").is_none() || messages[2]["content"].is_null());
    assert_eq!(
        messages[2]["tool_calls"][0]["function"]["arguments"],
        r#"{"city":"Paris"}"#
    );
    assert_eq!(messages[3]["role"], "tool");
    assert_eq!(messages[3]["tool_call_id"], "call_1");
    assert_eq!(body["tool_choice"], "required");
    assert_eq!(body["max_tokens"], 256);
}

/// Anthropic lifts the system prompt and nests tool traffic in content blocks
#[test]
fn test_anthropic_wire_request() {
    let adapter = AnthropicAdapter::new(settings()).unwrap();
    let body = body(&adapter, &conversation());

    assert_eq!(body["system"], "You are a weather bot.");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"][0]["type"], "tool_use");
    assert_eq!(messages[1]["content"][0]["input"], json!({"city": "Paris"}));
    assert_eq!(messages[2]["role"], "user");
    assert_eq!(messages[2]["content"][0]["type"], "tool_result");
    assert_eq!(messages[2]["content"][0]["tool_use_id"], "call_1");
    assert_eq!(body["tool_choice"]["type"], "any");
    assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
}

/// Gemini uses model turns, function parts and a camelCase generation config
#[test]
fn test_gemini_wire_request() {
    let adapter = GeminiAdapter::new(settings()).unwrap();
    let body = body(&adapter, &conversation());

    assert_eq!(
        body["systemInstruction"]["parts"][0]["text"],
        "You are a weather bot."
    );
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "get_weather");
    assert_eq!(
        contents[2]["parts"][0]["functionResponse"]["response"],
        json!({"content": "18C and sunny"})
    );
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    assert_eq!(body["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
}

/// Anthropic and Gemini reject remote image URLs; OpenAI forwards them
#[test_case("anthropic" ; "anthropic")]
#[test_case("gemini" ; "gemini")]
fn test_remote_image_rejected(provider: &str) {
    let adapter: Box<dyn ProviderAdapter> = match provider {
        "anthropic" => Box::new(AnthropicAdapter::new(settings()).unwrap()),
        _ => Box::new(GeminiAdapter::new(settings()).unwrap()),
    };
    let request = ChatRequest::new(
        "m",
        vec![MessageBuilder::with_parts(
            MessageRole::User,
            vec![ContentPart::ImageUrl {
                url: "https://example.com/cat.png".to_string(),
            }],
        )
        .build()],
    );

    let err = adapter.transform_request(&request, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[test]
fn test_openai_forwards_image_urls() {
    let adapter = OpenAIAdapter::new(settings()).unwrap();
    let request = ChatRequest::new(
        "gpt-4o",
        vec![MessageBuilder::with_parts(
            MessageRole::User,
            vec![ContentPart::ImageUrl {
                url: "https://example.com/cat.png".to_string(),
            }],
        )
        .build()],
    );

    let body = body(&adapter, &request);
    assert_eq!(
        body["messages"][0]["content"][0]["image_url"]["url"],
        "https://example.com/cat.png"
    );
}

/// A tool call response decodes to the same canonical shape everywhere
#[test_case("openai", json!({
    "id": "chatcmpl-1",
    "model": "gpt-4o",
    "choices": [{
        "index": 0,
        "message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}]
        },
        "finish_reason": "tool_calls"
    }]
}) ; "openai")]
#[test_case("anthropic", json!({
    "id": "msg_1",
    "model": "claude-3-5-sonnet",
    "content": [{"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"city": "Paris"}}],
    "stop_reason": "tool_use"
}) ; "anthropic")]
#[test_case("gemini", json!({
    "candidates": [{
        "content": {"role": "model", "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}]},
        "finishReason": "STOP"
    }]
}) ; "gemini")]
fn test_tool_call_responses_converge(provider: &str, raw: Value) {
    let adapter: Box<dyn ProviderAdapter> = match provider {
        "openai" => Box::new(OpenAIAdapter::new(settings()).unwrap()),
        "anthropic" => Box::new(AnthropicAdapter::new(settings()).unwrap()),
        _ => Box::new(GeminiAdapter::new(settings()).unwrap()),
    };
    let response = adapter
        .transform_response(raw.to_string().as_bytes())
        .unwrap();

    let choice = &response.choices[0];
    assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
    assert_eq!(choice.message.role, MessageRole::Assistant);

    let calls = choice.message.tool_calls.as_ref().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].function.name, "get_weather");
    let arguments: Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
    assert_eq!(arguments, json!({"city": "Paris"}));
    assert!(!calls[0].id.is_empty());
}

/// Malformed bodies surface as parse errors rather than panics
#[test_case("openai" ; "openai")]
#[test_case("anthropic" ; "anthropic")]
#[test_case("gemini" ; "gemini")]
fn test_malformed_response(provider: &str) {
    let adapter: Box<dyn ProviderAdapter> = match provider {
        "openai" => Box::new(OpenAIAdapter::new(settings()).unwrap()),
        "anthropic" => Box::new(AnthropicAdapter::new(settings()).unwrap()),
        _ => Box::new(GeminiAdapter::new(settings()).unwrap()),
    };
    let err = adapter.transform_response(b"<html>oops</html>").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}
