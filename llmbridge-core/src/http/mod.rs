//! HTTP layer for provider calls
//!
//! This module implements the transport seam of llmbridge, handling:
//! - Connection pooling and client management
//! - Building wire requests from adapter output
//! - Bounded body reads and retry hints
//! - Request ID generation and correlation

pub mod client;

pub use client::{HttpClient, DEFAULT_USER_AGENT, MAX_RESPONSE_SIZE};

use crate::protocol::CallMetadata;
use crate::providers::{parse_retry_after, ProviderError, ProviderRequest, ProviderResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Request, Response, Url};
use std::time::Duration;

/// Header carrying the per-call correlation id
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Sends fully built requests. Implemented by [`HttpClient`]; tests and
/// embedders can substitute their own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the raw response, whatever its status
    async fn send(&self, request: Request, meta: &CallMetadata) -> ProviderResult<Response>;

    /// Largest non-streaming body the caller should accept
    fn max_response_bytes(&self) -> usize {
        MAX_RESPONSE_SIZE
    }
}

/// Turn an adapter's [`ProviderRequest`] into a POST with a JSON body
pub fn build_request(request: &ProviderRequest, meta: &CallMetadata) -> ProviderResult<Request> {
    let provider = meta.provider.as_str();

    let url = Url::parse(&request.url).map_err(|e| {
        ProviderError::configuration(provider, format!("invalid URL '{}': {e}", request.url))
    })?;
    let body = serde_json::to_vec(&request.body).map_err(|e| {
        ProviderError::invalid_request(provider, format!("failed to serialize request: {e}"))
    })?;

    let mut headers = HeaderMap::with_capacity(request.headers.len() + 2);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            ProviderError::invalid_request(provider, format!("invalid header name '{name}': {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            ProviderError::invalid_request(provider, format!("invalid value for header '{name}': {e}"))
        })?;
        headers.insert(name, value);
    }
    headers.insert(
        REQUEST_ID_HEADER,
        HeaderValue::from_str(&meta.request_id.to_string()).map_err(|e| {
            ProviderError::invalid_request(provider, format!("invalid request id: {e}"))
        })?,
    );

    let mut wire = Request::new(Method::POST, url);
    *wire.headers_mut() = headers;
    *wire.body_mut() = Some(body.into());
    Ok(wire)
}

/// `Retry-After` in seconds, when the provider sent one
pub fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after)
}

/// Read a whole response body, refusing anything over `limit` bytes
pub async fn read_body(
    provider: &str,
    mut response: Response,
    limit: usize,
) -> ProviderResult<Vec<u8>> {
    if let Some(length) = response.content_length() {
        if length as usize > limit {
            return Err(too_large(provider, length as usize, limit));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, &e))?
    {
        if body.len() + chunk.len() > limit {
            return Err(too_large(provider, body.len() + chunk.len(), limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn too_large(provider: &str, size: usize, limit: usize) -> ProviderError {
    ProviderError::Custom {
        provider: provider.to_string(),
        code: "RESPONSE_TOO_LARGE".to_string(),
        message: format!("response size {size} exceeds maximum {limit}"),
        retryable: false,
    }
}
