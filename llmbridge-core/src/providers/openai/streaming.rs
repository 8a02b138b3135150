//! Streaming support for OpenAI responses
//!
//! Every `data:` line is a complete chunk envelope; the stream ends with a
//! literal `[DONE]` payload.

use super::converter::from_openai_stream_chunk;
use super::types::OpenAIStreamChunk;
use crate::providers::{map_error_type, ProviderError};
use crate::streaming::{SseHandler, SseOutcome};
use serde_json::Value;

/// Interprets OpenAI chat completion chunks
#[derive(Debug)]
pub struct OpenAIStreamHandler {
    provider: String,
}

impl OpenAIStreamHandler {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }

    fn stream_error(&self, error: &Value) -> ProviderError {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("stream error")
            .to_string();
        let error_type = ["code", "type"]
            .iter()
            .filter_map(|field| error.get(*field).and_then(Value::as_str))
            .find_map(|kind| map_error_type(&self.provider, kind, None, &message));

        error_type.unwrap_or_else(|| ProviderError::Api {
            provider: self.provider.clone(),
            status: 200,
            message,
        })
    }
}

impl SseHandler for OpenAIStreamHandler {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn handle(&mut self, _event: Option<&str>, data: &str) -> Result<SseOutcome, ProviderError> {
        if data == "[DONE]" {
            return Ok(SseOutcome::Done);
        }

        let value: Value = serde_json::from_str(data).map_err(|e| {
            tracing::error!(provider = %self.provider, error = %e, "failed to parse stream chunk");
            ProviderError::parse(&self.provider, format!("invalid stream chunk: {e}"))
        })?;

        if let Some(error) = value.get("error") {
            return Err(self.stream_error(error));
        }

        let chunk: OpenAIStreamChunk = serde_json::from_value(value)
            .map_err(|e| ProviderError::parse(&self.provider, format!("invalid stream chunk: {e}")))?;

        // Usage-only chunks (stream_options.include_usage) are still emitted
        if chunk.choices.is_empty() && chunk.usage.is_none() {
            return Ok(SseOutcome::Skip);
        }

        Ok(SseOutcome::Chunk(from_openai_stream_chunk(chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FinishReason;
    use crate::providers::ErrorKind;

    fn chunk(outcome: SseOutcome) -> crate::protocol::ChatStreamChunk {
        match outcome {
            SseOutcome::Chunk(chunk) => chunk,
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn parses_content_and_finish() {
        let mut handler = OpenAIStreamHandler::new("openai");
        let first = chunk(
            handler
                .handle(None, r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}"#)
                .unwrap(),
        );
        assert_eq!(first.text(), Some("Hi"));

        let last = chunk(
            handler
                .handle(None, r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#)
                .unwrap(),
        );
        assert_eq!(last.finish_reason(), Some(&FinishReason::Stop));
    }

    #[test]
    fn done_marker_ends_stream() {
        let mut handler = OpenAIStreamHandler::new("openai");
        assert_eq!(handler.handle(None, "[DONE]").unwrap(), SseOutcome::Done);
    }

    #[test]
    fn empty_envelope_is_skipped_but_usage_is_kept() {
        let mut handler = OpenAIStreamHandler::new("openai");
        assert_eq!(
            handler.handle(None, r#"{"id":"c1","model":"m","choices":[]}"#).unwrap(),
            SseOutcome::Skip
        );
        let usage = chunk(
            handler
                .handle(None, r#"{"id":"c1","model":"m","choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#)
                .unwrap(),
        );
        assert_eq!(usage.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn tool_call_fragments() {
        let mut handler = OpenAIStreamHandler::new("openai");
        let fragment = chunk(
            handler
                .handle(None, r#"{"id":"c1","model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"lookup","arguments":"{\"q\":"}}]}}]}"#)
                .unwrap(),
        );
        let calls = fragment.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].function.as_ref().unwrap().arguments.as_deref(), Some("{\"q\":"));
    }

    #[test]
    fn error_payload_is_terminal_error() {
        let mut handler = OpenAIStreamHandler::new("openai");
        let err = handler
            .handle(None, r#"{"error":{"message":"overloaded","type":"server_error"}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let mut handler = OpenAIStreamHandler::new("openai");
        assert_eq!(handler.handle(None, "{oops").unwrap_err().kind(), ErrorKind::Parse);
    }
}
