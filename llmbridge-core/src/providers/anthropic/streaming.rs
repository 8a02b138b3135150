//! Streaming support for Anthropic responses
//!
//! One message spans several named events:
//! - `message_start` carries the id, model and role
//! - `content_block_start` / `content_block_delta` carry text and tool input
//! - `message_delta` carries the stop reason and output usage
//! - `message_stop` ends the stream
//!
//! The role from `message_start` is attached to the first emitted chunk.

use super::converter::map_stop_reason;
use super::types::{StreamEvent, StreamMessage};
use crate::protocol::{
    ChatStreamChunk, CompletionUsage, FunctionCallDelta, MessageDelta, MessageRole, StreamChoice,
    ToolCallDelta,
};
use crate::providers::{map_error_type, ProviderError};
use crate::streaming::{SseHandler, SseOutcome};
use std::collections::HashMap;

/// Interprets the Anthropic message event lifecycle
#[derive(Debug)]
pub struct AnthropicStreamHandler {
    provider: String,
    id: String,
    model: String,
    pending_role: Option<MessageRole>,
    input_tokens: u32,
    /// Content block index to tool call ordinal
    tool_blocks: HashMap<u32, u32>,
}

impl AnthropicStreamHandler {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            id: String::new(),
            model: String::new(),
            pending_role: None,
            input_tokens: 0,
            tool_blocks: HashMap::new(),
        }
    }

    fn chunk(&mut self, delta: MessageDelta) -> ChatStreamChunk {
        let delta = MessageDelta {
            role: self.pending_role.take().or(delta.role),
            ..delta
        };
        ChatStreamChunk {
            id: self.id.clone(),
            model: self.model.clone(),
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }

    fn on_message_start(&mut self, message: Option<StreamMessage>) -> SseOutcome {
        if let Some(message) = message {
            self.id = message.id;
            self.model = message.model;
            self.input_tokens = message.usage.map(|usage| usage.input_tokens).unwrap_or(0);
            self.pending_role = match message.role.as_deref() {
                Some("user") => Some(MessageRole::User),
                _ => Some(MessageRole::Assistant),
            };
        }
        SseOutcome::Skip
    }

    fn on_block_start(&mut self, event: StreamEvent) -> SseOutcome {
        let Some(block) = event.content_block else {
            return SseOutcome::Skip;
        };
        if block.block_type != "tool_use" {
            return SseOutcome::Skip;
        }

        let ordinal = self.tool_blocks.len() as u32;
        self.tool_blocks.insert(event.index.unwrap_or(ordinal), ordinal);
        let chunk = self.chunk(MessageDelta {
            tool_calls: Some(vec![ToolCallDelta {
                index: ordinal,
                id: block.id,
                function: Some(FunctionCallDelta {
                    name: block.name,
                    arguments: None,
                }),
            }]),
            ..Default::default()
        });
        SseOutcome::Chunk(chunk)
    }

    fn on_block_delta(&mut self, event: StreamEvent) -> SseOutcome {
        let Some(delta) = event.delta else {
            return SseOutcome::Skip;
        };

        match delta.delta_type.as_deref() {
            Some("text_delta") => match delta.text {
                Some(text) if !text.is_empty() => SseOutcome::Chunk(self.chunk(MessageDelta {
                    content: Some(text),
                    ..Default::default()
                })),
                _ => SseOutcome::Skip,
            },
            Some("input_json_delta") => {
                let Some(ordinal) = event
                    .index
                    .and_then(|index| self.tool_blocks.get(&index).copied())
                else {
                    return SseOutcome::Skip;
                };
                SseOutcome::Chunk(self.chunk(MessageDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: ordinal,
                        id: None,
                        function: Some(FunctionCallDelta {
                            name: None,
                            arguments: delta.partial_json,
                        }),
                    }]),
                    ..Default::default()
                }))
            }
            // thinking and signature deltas have no canonical counterpart
            _ => SseOutcome::Skip,
        }
    }

    fn on_message_delta(&mut self, event: StreamEvent) -> SseOutcome {
        let finish_reason = event
            .delta
            .and_then(|delta| delta.stop_reason)
            .map(|reason| map_stop_reason(&reason));
        let usage = event
            .usage
            .map(|usage| CompletionUsage::new(self.input_tokens, usage.output_tokens));

        let mut chunk = self.chunk(MessageDelta::default());
        chunk.choices[0].finish_reason = finish_reason;
        chunk.usage = usage;
        SseOutcome::Chunk(chunk)
    }

    fn on_error(&self, event: StreamEvent) -> ProviderError {
        let (error_type, message) = event
            .error
            .map(|error| (error.error_type, error.message))
            .unwrap_or_else(|| (String::new(), "stream error".to_string()));

        map_error_type(&self.provider, &error_type, None, &message).unwrap_or_else(|| {
            ProviderError::Custom {
                provider: self.provider.clone(),
                code: error_type,
                message,
                retryable: false,
            }
        })
    }
}

impl SseHandler for AnthropicStreamHandler {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn handle(&mut self, event: Option<&str>, data: &str) -> Result<SseOutcome, ProviderError> {
        let mut parsed: StreamEvent = serde_json::from_str(data).map_err(|e| {
            tracing::error!(provider = %self.provider, error = %e, "failed to parse stream event");
            ProviderError::parse(&self.provider, format!("invalid stream event: {e}"))
        })?;
        if parsed.event_type.is_empty() {
            parsed.event_type = event.unwrap_or_default().to_string();
        }

        match parsed.event_type.as_str() {
            "message_start" => Ok(self.on_message_start(parsed.message)),
            "content_block_start" => Ok(self.on_block_start(parsed)),
            "content_block_delta" => Ok(self.on_block_delta(parsed)),
            "message_delta" => Ok(self.on_message_delta(parsed)),
            "message_stop" => Ok(SseOutcome::Done),
            "error" => Err(self.on_error(parsed)),
            // ping, content_block_stop and future event types
            _ => Ok(SseOutcome::Skip),
        }
    }
}
