//! Translation rules shared by the provider adapters
//!
//! Vendors disagree on where system prompts live, how images are embedded and
//! whether tool arguments are strings or objects. The helpers here implement
//! each rule once so the adapters only differ in wire shapes.

use super::error::{ProviderError, ProviderResult};
use crate::protocol::{Message, MessageRole};
use serde_json::{json, Map, Value};

/// Pull every system message out of the conversation.
///
/// System texts are joined with a blank line in their original order; the
/// returned list keeps all other messages in order.
pub fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::with_capacity(messages.len());

    for message in messages {
        if message.role == MessageRole::System {
            system_parts.push(message.content.joined_text());
        } else {
            rest.push(message);
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, rest)
}

/// Pieces of a `data:<mime>;base64,<payload>` URI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUri<'a> {
    pub mime_type: &'a str,
    pub data: &'a str,
}

/// Split an inline image URI into media type and base64 payload
pub fn parse_data_uri<'a>(provider: &str, url: &'a str) -> ProviderResult<DataUri<'a>> {
    let rest = url.strip_prefix("data:").ok_or_else(|| {
        ProviderError::invalid_request(provider, "image URL must be a data URI (data:<mime>;base64,<payload>)")
    })?;
    let semicolon = rest.find(';').ok_or_else(|| {
        ProviderError::invalid_request(provider, "data URI is missing the ';' after the media type")
    })?;
    let comma = rest[semicolon..].find(',').ok_or_else(|| {
        ProviderError::invalid_request(provider, "data URI is missing the ',' before the payload")
    })? + semicolon;

    Ok(DataUri {
        mime_type: &rest[..semicolon],
        data: &rest[comma + 1..],
    })
}

/// Decode a JSON-string argument list into the object vendors expect.
///
/// Anything that is not a JSON object is kept under a `raw` key.
pub fn arguments_to_object(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "raw": arguments }),
    }
}

/// Encode a vendor argument object back into the canonical JSON string
pub fn arguments_to_string(arguments: &Value) -> String {
    match arguments {
        Value::Null => "{}".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tool output as an object; plain text lands under a `content` key
pub fn tool_result_to_object(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "content": content }),
    }
}
