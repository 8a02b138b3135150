//! Provider error types, classification and HTTP status mapping

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur when interacting with LLM providers.
///
/// Every variant names the provider it came from so operators can tell a
/// local bug from a vendor refusal.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Bad or missing credential
    #[error("{provider}: authentication failed{}: {message}", status_suffix(.status))]
    Authentication {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Valid credential lacking the required scope
    #[error("{provider}: permission denied{}: {message}", status_suffix(.status))]
    Permission {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Rate limit exceeded
    #[error("{provider}: rate limit exceeded: {message}")]
    RateLimit {
        provider: String,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Deadline exceeded, locally or reported by the provider
    #[error("{provider}: request timed out: {message}")]
    Timeout { provider: String, message: String },

    /// Temporary server-side failure (5xx, overloaded)
    #[error("{provider}: service unavailable{}: {message}", status_suffix(.status))]
    ServiceUnavailable {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Input does not fit the model's context window
    #[error("{provider}: context window exceeded{}: {message}", status_suffix(.status))]
    ContextWindowExceeded {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Input or output blocked by a safety or policy filter
    #[error("{provider}: content policy violation{}: {message}", status_suffix(.status))]
    ContentPolicyViolation {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Malformed request that should not be retried
    #[error("{provider}: invalid request{}: {message}", status_suffix(.status))]
    InvalidRequest {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Unclassified API error status
    #[error("{provider}: API error (HTTP {status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    /// Connection or body transfer failure
    #[error("{provider}: network error: {message}")]
    Network { provider: String, message: String },

    /// Provider payload could not be decoded
    #[error("{provider}: failed to parse response: {message}")]
    Parse { provider: String, message: String },

    /// Misconfigured provider or credential
    #[error("{provider}: configuration error: {message}")]
    Configuration { provider: String, message: String },

    /// The caller cancelled the call
    #[error("{provider}: request cancelled")]
    Cancelled { provider: String },

    /// Retryable failures persisted past the retry budget
    #[error("{provider}: retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last: Box<ProviderError>,
    },

    /// Provider-specific error that reports its own retryability
    #[error("{provider}: error [{code}]: {message}")]
    Custom {
        provider: String,
        code: String,
        message: String,
        retryable: bool,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

/// Classification of a [`ProviderError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Permission,
    RateLimit,
    Timeout,
    ServiceUnavailable,
    ContextWindowExceeded,
    ContentPolicyViolation,
    InvalidRequest,
    Api,
    Network,
    Parse,
    Configuration,
    Cancelled,
    RetriesExhausted,
    Custom,
}

impl ProviderError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::ContextWindowExceeded { .. } => ErrorKind::ContextWindowExceeded,
            Self::ContentPolicyViolation { .. } => ErrorKind::ContentPolicyViolation,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::Api { .. } => ErrorKind::Api,
            Self::Network { .. } => ErrorKind::Network,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::Custom { .. } => ErrorKind::Custom,
        }
    }

    /// Determine if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Timeout { .. } => true,
            Self::ServiceUnavailable { .. } => true,
            Self::Network { .. } => true,
            Self::Custom { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Provider-suggested wait before retrying, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Name of the provider the error originated from
    pub fn provider(&self) -> &str {
        match self {
            Self::Authentication { provider, .. }
            | Self::Permission { provider, .. }
            | Self::RateLimit { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::ServiceUnavailable { provider, .. }
            | Self::ContextWindowExceeded { provider, .. }
            | Self::ContentPolicyViolation { provider, .. }
            | Self::InvalidRequest { provider, .. }
            | Self::Api { provider, .. }
            | Self::Network { provider, .. }
            | Self::Parse { provider, .. }
            | Self::Configuration { provider, .. }
            | Self::Cancelled { provider }
            | Self::RetriesExhausted { provider, .. }
            | Self::Custom { provider, .. } => provider,
        }
    }

    /// HTTP status the provider answered with, where one exists
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. }
            | Self::Permission { status, .. }
            | Self::ServiceUnavailable { status, .. }
            | Self::ContextWindowExceeded { status, .. }
            | Self::ContentPolicyViolation { status, .. }
            | Self::InvalidRequest { status, .. } => *status,
            Self::Api { status, .. } => Some(*status),
            Self::RateLimit { .. } => Some(429),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    pub fn invalid_request(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            provider: provider.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn parse(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn configuration(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(provider: impl Into<String>) -> Self {
        Self::Cancelled {
            provider: provider.into(),
        }
    }

    /// Attach a `Retry-After` hint to a rate-limit error that lacks one
    pub fn with_retry_after(mut self, hint: Option<Duration>) -> Self {
        if let Self::RateLimit { retry_after, .. } = &mut self {
            if retry_after.is_none() {
                *retry_after = hint;
            }
        }
        self
    }

    /// Map a transport failure from reqwest
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(provider, err.to_string())
        } else if err.is_connect() {
            Self::network(provider, format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::parse(provider, err.to_string())
        } else {
            Self::network(provider, err.to_string())
        }
    }
}

/// Error details extracted from a provider error body
#[derive(Debug, Default)]
struct ErrorDetails {
    message: Option<String>,
    error_type: Option<String>,
    retry_after_seconds: Option<u64>,
}

/// Extract error details from common vendor error envelopes
fn extract_error_details(body: &str) -> ErrorDetails {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return ErrorDetails::default();
    };

    // OpenAI:    { "error": { "message", "type", "code" } }
    // Anthropic: { "type": "error", "error": { "type", "message" } }
    // Gemini:    { "error": { "code", "message", "status" } }
    if let Some(error) = json.get("error") {
        if let Some(text) = error.as_str() {
            return ErrorDetails {
                message: Some(text.to_string()),
                ..Default::default()
            };
        }
        let error_type = ["code", "type", "status"]
            .iter()
            .filter_map(|field| error.get(*field).and_then(Value::as_str))
            .find(|value| !value.is_empty())
            .map(str::to_string);
        return ErrorDetails {
            message: error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            error_type,
            retry_after_seconds: error.get("retry_after").and_then(Value::as_u64),
        };
    }

    ErrorDetails {
        message: json
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        error_type: None,
        retry_after_seconds: json.get("retry_after").and_then(Value::as_u64),
    }
}

/// Classify a vendor error type string (`overloaded_error`, `RESOURCE_EXHAUSTED`, ...)
pub fn map_error_type(
    provider: &str,
    error_type: &str,
    status: Option<u16>,
    message: &str,
) -> Option<ProviderError> {
    let provider = provider.to_string();
    let message = message.to_string();
    let error = match error_type {
        "authentication_error" | "invalid_api_key" | "UNAUTHENTICATED" => {
            ProviderError::Authentication {
                provider,
                status,
                message,
            }
        }
        "permission_error" | "PERMISSION_DENIED" => ProviderError::Permission {
            provider,
            status,
            message,
        },
        "rate_limit_error" | "rate_limit_exceeded" | "RESOURCE_EXHAUSTED" => {
            ProviderError::RateLimit {
                provider,
                message,
                retry_after: None,
            }
        }
        "overloaded_error" | "api_error" | "server_error" | "UNAVAILABLE" | "INTERNAL" => {
            ProviderError::ServiceUnavailable {
                provider,
                status,
                message,
            }
        }
        "timeout_error" | "DEADLINE_EXCEEDED" => ProviderError::Timeout { provider, message },
        "context_length_exceeded" | "string_above_max_length" => {
            ProviderError::ContextWindowExceeded {
                provider,
                status,
                message,
            }
        }
        "content_policy_violation" | "content_filter" => ProviderError::ContentPolicyViolation {
            provider,
            status,
            message,
        },
        _ => return None,
    };
    Some(error)
}

fn mentions_context_window(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["context length", "context window", "maximum context", "prompt is too long", "too many tokens"]
        .iter()
        .any(|hint| lower.contains(hint))
}

fn mentions_content_policy(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["content policy", "content_policy", "safety system"]
        .iter()
        .any(|hint| lower.contains(hint))
}

/// Map an HTTP status code and response body to a [`ProviderError`].
///
/// The vendor's own error type wins over the bare status code; the message
/// is the vendor's text verbatim, or the raw body when it has no envelope.
pub fn map_http_error(
    provider: &str,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> ProviderError {
    let details = extract_error_details(body);
    let message = details.message.clone().unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("HTTP error {status}")
        } else {
            body.to_string()
        }
    });

    if let Some(error_type) = details.error_type.as_deref() {
        if let Some(mut error) = map_error_type(provider, error_type, Some(status), &message) {
            if let ProviderError::RateLimit {
                retry_after: slot, ..
            } = &mut error
            {
                *slot = retry_after.or(details.retry_after_seconds.map(Duration::from_secs));
            }
            return error;
        }
    }

    let provider = provider.to_string();
    match status {
        401 => ProviderError::Authentication {
            provider,
            status: Some(status),
            message,
        },
        403 => ProviderError::Permission {
            provider,
            status: Some(status),
            message,
        },
        429 => ProviderError::RateLimit {
            provider,
            message,
            retry_after: retry_after.or(details.retry_after_seconds.map(Duration::from_secs)),
        },
        408 | 504 => ProviderError::Timeout { provider, message },
        413 => ProviderError::ContextWindowExceeded {
            provider,
            status: Some(status),
            message,
        },
        400 | 404 | 422 if mentions_context_window(&message) => {
            ProviderError::ContextWindowExceeded {
                provider,
                status: Some(status),
                message,
            }
        }
        400 | 404 | 422 if mentions_content_policy(&message) => {
            ProviderError::ContentPolicyViolation {
                provider,
                status: Some(status),
                message,
            }
        }
        400 | 404 | 422 => ProviderError::InvalidRequest {
            provider,
            status: Some(status),
            message,
        },
        500..=599 => ProviderError::ServiceUnavailable {
            provider,
            status: Some(status),
            message,
        },
        _ => ProviderError::Api {
            provider,
            status,
            message,
        },
    }
}

/// Parse a Retry-After header value given in seconds
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    header_value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(401, ErrorKind::Authentication ; "unauthorized")]
    #[test_case(403, ErrorKind::Permission ; "forbidden")]
    #[test_case(429, ErrorKind::RateLimit ; "too many requests")]
    #[test_case(408, ErrorKind::Timeout ; "request timeout")]
    #[test_case(504, ErrorKind::Timeout ; "gateway timeout")]
    #[test_case(503, ErrorKind::ServiceUnavailable ; "unavailable")]
    #[test_case(529, ErrorKind::ServiceUnavailable ; "overloaded")]
    #[test_case(400, ErrorKind::InvalidRequest ; "bad request")]
    #[test_case(418, ErrorKind::Api ; "unclassified")]
    fn maps_status_codes(status: u16, kind: ErrorKind) {
        assert_eq!(map_http_error("test", status, None, "").kind(), kind);
    }

    #[test]
    fn vendor_error_type_beats_status() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let error = map_http_error("anthropic", 400, None, body);
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
        assert!(error.is_retryable());
        assert_eq!(error.status(), Some(400));
    }

    #[test]
    fn keeps_vendor_message_verbatim() {
        let body = r#"{"error":{"message":"Incorrect API key provided: sk-xx","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        let error = map_http_error("openai", 401, None, body);
        assert_eq!(error.kind(), ErrorKind::Authentication);
        assert_eq!(error.provider(), "openai");
        assert!(error.to_string().contains("Incorrect API key provided: sk-xx"));
        assert!(error.to_string().contains("HTTP 401"));
    }

    #[test]
    fn detects_context_window_and_policy_hints() {
        let body = r#"{"error":{"message":"This model's maximum context length is 8192 tokens","type":"invalid_request_error"}}"#;
        assert_eq!(
            map_http_error("openai", 400, None, body).kind(),
            ErrorKind::ContextWindowExceeded
        );

        let body = r#"{"error":{"message":"rejected by our safety system","type":"invalid_request_error"}}"#;
        assert_eq!(
            map_http_error("openai", 400, None, body).kind(),
            ErrorKind::ContentPolicyViolation
        );
    }

    #[test]
    fn gemini_status_strings_are_classified() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let error = map_http_error("gemini", 429, Some(Duration::from_secs(7)), body);
        assert_eq!(error.kind(), ErrorKind::RateLimit);
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn raw_body_is_used_when_not_json() {
        let error = map_http_error("test", 502, None, "upstream connect error");
        assert!(error.to_string().contains("upstream connect error"));
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(ProviderError::timeout("p", "slow").is_retryable());
        assert!(!ProviderError::invalid_request("p", "bad").is_retryable());
        assert!(!ProviderError::cancelled("p").is_retryable());
        let custom = ProviderError::Custom {
            provider: "p".into(),
            code: "flaky".into(),
            message: "try again".into(),
            retryable: true,
        };
        assert!(custom.is_retryable());
    }

    #[test]
    fn retry_after_header_parsing() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
