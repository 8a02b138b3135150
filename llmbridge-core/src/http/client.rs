//! HTTP client implementation using reqwest

use super::Transport;
use crate::config::ConnectionConfig;
use crate::protocol::CallMetadata;
use crate::providers::{ProviderError, ProviderResult};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum non-streaming response size (10MB)
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Default user agent
pub const DEFAULT_USER_AGENT: &str = concat!("llmbridge/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client with connection pooling
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// The underlying reqwest client
    client: Arc<Client>,

    /// Maximum response size to prevent OOM
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> ProviderResult<Self> {
        Self::from_config(&ConnectionConfig::default())
    }

    /// Create a new HTTP client from connection settings
    pub fn from_config(config: &ConnectionConfig) -> ProviderResult<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let client = ClientBuilder::new()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.keepalive_secs))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(user_agent)
            .gzip(true)
            .build()
            .map_err(|e| {
                ProviderError::configuration("http", format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client: Arc::new(client),
            max_response_size: config.max_response_bytes,
        })
    }

    /// The pooled reqwest client, for collaborators that make their own calls
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: Request, meta: &CallMetadata) -> ProviderResult<Response> {
        info!(
            request_id = %meta.request_id,
            provider = %meta.provider,
            model = %meta.model,
            "sending provider request"
        );
        debug!(request_id = %meta.request_id, url = %request.url(), "request URL");

        let response = self.client.execute(request).await.map_err(|e| {
            warn!(
                request_id = %meta.request_id,
                provider = %meta.provider,
                error = %e,
                "transport failure"
            );
            ProviderError::from_reqwest(&meta.provider, &e)
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(
                request_id = %meta.request_id,
                status = status.as_u16(),
                elapsed_ms = meta.elapsed().as_millis() as u64,
                "response received"
            );
        } else {
            warn!(
                request_id = %meta.request_id,
                provider = %meta.provider,
                status = status.as_u16(),
                "request failed"
            );
        }

        Ok(response)
    }

    fn max_response_bytes(&self) -> usize {
        self.max_response_size
    }
}
