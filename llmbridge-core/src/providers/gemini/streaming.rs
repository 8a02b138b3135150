//! Streaming support for Gemini responses
//!
//! `streamGenerateContent?alt=sse` sends one complete response envelope per
//! `data:` line and ends at EOF. Envelopes without candidates carry either
//! nothing useful, a prompt block, or an in-band error.

use super::converter::{candidate_finish_reason, split_parts, synthetic_call_id, to_usage};
use super::types::{GeminiError, GeminiResponse};
use crate::protocol::{
    ChatStreamChunk, FunctionCallDelta, MessageDelta, MessageRole, StreamChoice, ToolCallDelta,
};
use crate::providers::{map_error_type, ProviderError};
use crate::streaming::{SseHandler, SseOutcome};
use std::collections::HashSet;

/// Interprets Gemini response envelopes
#[derive(Debug)]
pub struct GeminiStreamHandler {
    provider: String,
    model: String,
    role_sent: bool,
    tool_calls_seen: usize,
    /// Candidate indexes that have emitted a function call
    calling_candidates: HashSet<u32>,
}

impl GeminiStreamHandler {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: String::new(),
            role_sent: false,
            tool_calls_seen: 0,
            calling_candidates: HashSet::new(),
        }
    }

    fn stream_error(&self, error: GeminiError) -> ProviderError {
        let status = error.status.unwrap_or_default();
        map_error_type(&self.provider, &status, error.code, &error.message).unwrap_or_else(|| {
            ProviderError::Api {
                provider: self.provider.clone(),
                status: error.code.unwrap_or(200),
                message: error.message,
            }
        })
    }

    fn to_chunk(&mut self, envelope: GeminiResponse) -> ChatStreamChunk {
        let mut finished = false;
        let mut choices = Vec::with_capacity(envelope.candidates.len());

        for (position, candidate) in envelope.candidates.iter().enumerate() {
            let index = candidate.index.unwrap_or(position as u32);
            let parts = candidate
                .content
                .as_ref()
                .map(|content| content.parts.as_slice())
                .unwrap_or_default();
            let (text, calls) = split_parts(parts);

            let tool_calls: Vec<ToolCallDelta> = calls
                .into_iter()
                .map(|(name, arguments)| {
                    let ordinal = self.tool_calls_seen;
                    self.tool_calls_seen += 1;
                    ToolCallDelta {
                        index: ordinal as u32,
                        id: Some(synthetic_call_id(ordinal)),
                        function: Some(FunctionCallDelta {
                            name: Some(name),
                            arguments: Some(arguments),
                        }),
                    }
                })
                .collect();
            if !tool_calls.is_empty() {
                self.calling_candidates.insert(index);
            }

            let finish_reason = candidate_finish_reason(
                candidate.finish_reason.as_deref(),
                self.calling_candidates.contains(&index),
            );
            finished |= finish_reason.is_some();

            choices.push(StreamChoice {
                index,
                delta: MessageDelta {
                    role: (!self.role_sent).then_some(MessageRole::Assistant),
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason,
            });
        }
        self.role_sent = true;

        if let Some(version) = envelope.model_version {
            self.model = version;
        }

        ChatStreamChunk {
            id: envelope.response_id.unwrap_or_default(),
            model: self.model.clone(),
            choices,
            // usageMetadata repeats on every envelope; report it once at the end
            usage: if finished {
                envelope.usage_metadata.map(to_usage)
            } else {
                None
            },
        }
    }
}

impl SseHandler for GeminiStreamHandler {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn handle(&mut self, _event: Option<&str>, data: &str) -> Result<SseOutcome, ProviderError> {
        if data == "[DONE]" {
            return Ok(SseOutcome::Done);
        }

        let envelope: GeminiResponse = serde_json::from_str(data).map_err(|e| {
            tracing::error!(provider = %self.provider, error = %e, "failed to parse stream envelope");
            ProviderError::parse(&self.provider, format!("invalid stream envelope: {e}"))
        })?;

        if let Some(error) = envelope.error {
            return Err(self.stream_error(error));
        }

        if let Some(reason) = envelope
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Err(ProviderError::ContentPolicyViolation {
                provider: self.provider.clone(),
                status: None,
                message: format!("prompt blocked: {reason}"),
            });
        }

        if envelope.candidates.is_empty() {
            return Ok(SseOutcome::Skip);
        }

        Ok(SseOutcome::Chunk(self.to_chunk(envelope)))
    }
}
