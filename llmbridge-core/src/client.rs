//! Provider-agnostic client
//!
//! [`Client`] owns the adapter registry, transport, retry executor and the
//! optional collaborators (cache, callbacks, cost calculator). A completion
//! runs these steps in order:
//! - request validation
//! - `before_request` callbacks, which may abort the call
//! - cache lookup
//! - retried attempts of transform, authorize, send and decode
//! - cache store and `on_success` / `on_failure` callbacks
//!
//! Streaming completions make exactly one attempt and skip the cache.

use crate::auth::ServiceAccountTokenProvider;
use crate::cache::{cache_key, Cache, MemoryCache};
use crate::callbacks::{Callback, CallbackRegistry};
use crate::config::{BridgeConfig, ConfigError, ConfigResult};
use crate::cost::{CostCalculator, CostError, PricingTable};
use crate::http::{build_request, read_body, retry_after_header, HttpClient, Transport};
use crate::protocol::{CallMetadata, ChatRequest, ChatResponse, ChatStreamChunk};
use crate::providers::{
    ProviderAdapter, ProviderError, ProviderRegistry, ProviderResult, ProviderSettings,
    RetryExecutor, RetryPolicy,
};
use crate::streaming::{response_body, ChunkStream, StreamDecoder};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CLIENT: &str = "client";

/// Cache backend plus the key namespace and entry lifetime the client uses
#[derive(Clone)]
struct CacheSettings {
    backend: Arc<dyn Cache>,
    namespace: String,
    ttl: Option<Duration>,
}

/// Unified LLM client
#[derive(Clone)]
pub struct Client {
    registry: ProviderRegistry,
    transport: Arc<dyn Transport>,
    retry: RetryExecutor,
    cache: Option<CacheSettings>,
    callbacks: Arc<CallbackRegistry>,
    cost: Option<Arc<dyn CostCalculator>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry)
            .field("retry", self.retry.policy())
            .field("cache", &self.cache.as_ref().map(|c| &c.namespace))
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a client from a validated configuration
    pub fn from_config(config: &BridgeConfig) -> ConfigResult<Self> {
        ClientBuilder::from_config(config)?
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run a non-streaming completion with retries.
    ///
    /// `timeout` bounds the whole call including backoff; `None` uses the
    /// retry policy's default.
    pub async fn completion(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> ProviderResult<ChatResponse> {
        request
            .validate()
            .map_err(|e| ProviderError::invalid_request(CLIENT, e.to_string()))?;
        let adapter = self.registry.resolve(&request.model)?;
        let meta = CallMetadata::new(adapter.name(), &request.model);

        info!(
            request_id = %meta.request_id,
            provider = %meta.provider,
            model = %meta.model,
            "starting completion"
        );

        let result = self
            .run_completion(adapter.as_ref(), request, &meta, cancel, timeout)
            .await;

        match &result {
            Ok(response) => {
                info!(
                    request_id = %meta.request_id,
                    provider = %meta.provider,
                    elapsed_ms = meta.elapsed().as_millis() as u64,
                    total_tokens = response.usage.map(|u| u.total_tokens),
                    "completion succeeded"
                );
                self.callbacks.on_success(&meta, response).await;
            }
            Err(err) => {
                warn!(
                    request_id = %meta.request_id,
                    provider = %meta.provider,
                    error = %err,
                    "completion failed"
                );
                self.callbacks.on_failure(&meta, err).await;
            }
        }
        result
    }

    async fn run_completion(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ChatRequest,
        meta: &CallMetadata,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> ProviderResult<ChatResponse> {
        self.callbacks
            .before_request(meta, request)
            .await
            .map_err(|e| e.into_provider_error(&meta.provider))?;

        let mut key = None;
        if let Some(cache) = &self.cache {
            if let Some((derived, hit)) = self.cache_lookup(cache, request, meta).await {
                if let Some(response) = hit {
                    return Ok(response);
                }
                key = Some(derived);
            }
        }

        let response = self
            .retry
            .execute(&meta.provider, cancel, timeout, move |attempt| {
                self.attempt(adapter, request, meta, attempt)
            })
            .await?;

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            self.cache_store(cache, &key, &response).await;
        }
        Ok(response)
    }

    /// One transform, authorize, send and decode round
    async fn attempt(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ChatRequest,
        meta: &CallMetadata,
        attempt: u32,
    ) -> ProviderResult<ChatResponse> {
        debug!(request_id = %meta.request_id, provider = %meta.provider, attempt, "attempt");

        let response = self.dispatch(adapter, request, meta, false).await?;
        let body = read_body(adapter.name(), response, self.transport.max_response_bytes()).await?;

        adapter.transform_response(&body).map_err(|err| {
            error!(
                request_id = %meta.request_id,
                provider = %meta.provider,
                attempt,
                error = %err,
                "failed to decode provider response"
            );
            err
        })
    }

    /// Build, authorize and send a request; non-success statuses become errors
    async fn dispatch(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &ChatRequest,
        meta: &CallMetadata,
        stream: bool,
    ) -> ProviderResult<reqwest::Response> {
        let mut provider_request = adapter.transform_request(request, stream)?;
        adapter.authorize(&mut provider_request).await?;

        let wire = build_request(&provider_request, meta)?;
        let response = self.transport.send(wire, meta).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after_header(response.headers());
        let body = read_body(adapter.name(), response, self.transport.max_response_bytes())
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        Err(adapter
            .map_error(status.as_u16(), &body)
            .with_retry_after(retry_after))
    }

    /// Start a streaming completion. Exactly one attempt is made.
    pub async fn completion_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<CompletionStream> {
        request
            .validate()
            .map_err(|e| ProviderError::invalid_request(CLIENT, e.to_string()))?;
        let adapter = self.registry.resolve(&request.model)?;
        let meta = CallMetadata::new(adapter.name(), &request.model);

        info!(
            request_id = %meta.request_id,
            provider = %meta.provider,
            model = %meta.model,
            "starting streaming completion"
        );

        let opened = async {
            self.callbacks
                .before_request(&meta, request)
                .await
                .map_err(|e| e.into_provider_error(&meta.provider))?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProviderError::cancelled(&meta.provider)),
                result = self.dispatch(adapter.as_ref(), request, &meta, true) => result,
            }
        }
        .await;

        match opened {
            Ok(response) => Ok(CompletionStream {
                decoder: adapter.new_stream_decoder(response_body(response)),
                meta,
                callbacks: Arc::clone(&self.callbacks),
                cancel: cancel.clone(),
            }),
            Err(err) => {
                warn!(
                    request_id = %meta.request_id,
                    provider = %meta.provider,
                    error = %err,
                    "streaming completion failed to start"
                );
                self.callbacks.on_failure(&meta, &err).await;
                Err(err)
            }
        }
    }

    /// USD cost of a response, using the configured calculator
    pub fn cost(&self, response: &ChatResponse) -> Result<f64, CostError> {
        match &self.cost {
            Some(calculator) => calculator.cost(&response.model, response.usage.as_ref()),
            None => Err(CostError::PricingUnavailable {
                model: response.model.clone(),
                reason: "no cost calculator configured".to_string(),
            }),
        }
    }

    /// Returns the key and, on a hit, the cached response. Cache failures are
    /// logged and treated as misses.
    async fn cache_lookup(
        &self,
        cache: &CacheSettings,
        request: &ChatRequest,
        meta: &CallMetadata,
    ) -> Option<(String, Option<ChatResponse>)> {
        let key = match cache_key(&cache.namespace, request) {
            Ok(key) => key,
            Err(err) => {
                warn!(request_id = %meta.request_id, error = %err, "cache key derivation failed");
                return None;
            }
        };

        let hit = match cache.backend.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<ChatResponse>(&bytes) {
                Ok(response) => {
                    debug!(request_id = %meta.request_id, cache_key = %key, "serving from cache");
                    Some(response)
                }
                Err(err) => {
                    warn!(request_id = %meta.request_id, error = %err, "discarding corrupt cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(request_id = %meta.request_id, error = %err, "cache lookup failed");
                None
            }
        };
        Some((key, hit))
    }

    async fn cache_store(&self, cache: &CacheSettings, key: &str, response: &ChatResponse) {
        let bytes = match serde_json::to_vec(response) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(cache_key = key, error = %err, "failed to serialize response for cache");
                return;
            }
        };
        if let Err(err) = cache.backend.set(key, bytes, cache.ttl).await {
            warn!(cache_key = key, error = %err, "cache store failed");
        }
    }
}

// ============================================================================
// Streaming handle
// ============================================================================

/// An open streaming completion.
///
/// Wraps the provider's [`StreamDecoder`], running chunk callbacks and
/// honouring the cancellation token the call was started with.
pub struct CompletionStream {
    decoder: StreamDecoder,
    meta: CallMetadata,
    callbacks: Arc<CallbackRegistry>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream")
            .field("request_id", &self.meta.request_id)
            .field("decoder", &self.decoder)
            .finish()
    }
}

impl CompletionStream {
    /// Identity of the call
    pub fn metadata(&self) -> &CallMetadata {
        &self.meta
    }

    /// Next chunk, or `Ok(None)` at the end of the stream
    pub async fn recv(&mut self) -> ProviderResult<Option<ChatStreamChunk>> {
        let was_open = !self.decoder.is_terminated();
        match self.decoder.recv_with_cancel(&self.cancel).await {
            Ok(Some(chunk)) => {
                self.callbacks.on_chunk(&self.meta, &chunk).await;
                Ok(Some(chunk))
            }
            Ok(None) => {
                if was_open {
                    debug!(
                        request_id = %self.meta.request_id,
                        elapsed_ms = self.meta.elapsed().as_millis() as u64,
                        "stream finished"
                    );
                }
                Ok(None)
            }
            Err(err) => {
                if was_open {
                    self.callbacks.on_failure(&self.meta, &err).await;
                }
                Err(err)
            }
        }
    }

    /// Release the response body early. Safe to call more than once.
    pub fn close(&mut self) {
        self.decoder.close();
    }

    /// Adapt into a [`futures::Stream`] of chunks
    pub fn into_stream(self) -> ChunkStream {
        Box::pin(futures::stream::unfold(Some(self), |stream| async move {
            let mut stream = stream?;
            match stream.recv().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(stream))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        }))
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Client`]
#[derive(Default)]
pub struct ClientBuilder {
    registry: ProviderRegistry,
    default_provider: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    retry_policy: RetryPolicy,
    cache: Option<CacheSettings>,
    callbacks: CallbackRegistry,
    cost: Option<Arc<dyn CostCalculator>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its name. The first one is the default.
    pub fn with_provider(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.registry.register(adapter);
        self
    }

    /// Adapter serving model names without a `provider/` prefix
    pub fn with_default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replace the default reqwest transport
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_cache(
        mut self,
        cache: Arc<dyn Cache>,
        namespace: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        self.cache = Some(CacheSettings {
            backend: cache,
            namespace: namespace.into(),
            ttl,
        });
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.register(callback);
        self
    }

    pub fn with_cost_calculator(mut self, calculator: Arc<dyn CostCalculator>) -> Self {
        self.cost = Some(calculator);
        self
    }

    /// Translate a configuration into a builder.
    ///
    /// Service-account key files are read here; the token provider shares
    /// the client's connection pool.
    pub fn from_config(config: &BridgeConfig) -> ConfigResult<Self> {
        config.validate()?;

        let http = HttpClient::from_config(&config.connection).map_err(|e| {
            ConfigError::Invalid {
                message: e.to_string(),
            }
        })?;
        let mut builder = Self::new()
            .with_retry_policy(config.retry.clone())
            .with_transport(Arc::new(http.clone()));

        for provider in config.enabled_providers() {
            let mut settings = ProviderSettings::new().with_name(&provider.name);
            settings.base_url = provider.base_url.clone();
            settings.api_key = provider.api_key.clone();
            settings.default_max_tokens = provider.default_max_tokens;
            settings.extra_headers = provider.headers.clone();

            if let Some(path) = &provider.service_account_file {
                let token_provider = ServiceAccountTokenProvider::from_file(path)
                    .map_err(|source| ConfigError::Credentials {
                        provider: provider.name.clone(),
                        source,
                    })?
                    .with_http_client(http.inner().clone());
                settings = settings.with_token_provider(Arc::new(token_provider));
            }

            let adapter = provider
                .kind
                .create_adapter(settings)
                .map_err(|e| ConfigError::Invalid {
                    message: e.to_string(),
                })?;
            builder = builder.with_provider(Arc::from(adapter));
        }

        if let Some(default) = &config.default_provider {
            builder = builder.with_default_provider(default);
        }
        if let Some(cache) = &config.cache {
            builder = builder.with_cache(
                Arc::new(MemoryCache::new(cache.max_entries)),
                &cache.namespace,
                Some(Duration::from_secs(cache.ttl_secs)),
            );
        }

        let pricing = PricingTable::from_config(config);
        if !pricing.is_empty() {
            builder = builder.with_cost_calculator(Arc::new(pricing));
        }

        Ok(builder)
    }

    pub fn build(self) -> ProviderResult<Client> {
        let mut registry = self.registry;
        if registry.is_empty() {
            return Err(ProviderError::configuration(
                CLIENT,
                "at least one provider must be registered",
            ));
        }
        if let Some(default) = &self.default_provider {
            registry.set_default(default)?;
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpClient::new()?),
        };

        Ok(Client {
            registry,
            transport,
            retry: RetryExecutor::new(self.retry_policy),
            cache: self.cache,
            callbacks: Arc::new(self.callbacks),
            cost: self.cost,
        })
    }
}
