//! Lifecycle hooks around provider calls
//!
//! Callbacks run in registration order. A `before_request` error aborts the
//! call before any provider I/O; the remaining hooks only observe.

use crate::protocol::{CallMetadata, ChatRequest, ChatResponse, ChatStreamChunk};
use crate::providers::ProviderError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Raised by a callback to veto a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("callback '{callback}' rejected the request: {message}")]
pub struct CallbackError {
    pub callback: String,
    pub message: String,
}

impl CallbackError {
    pub fn new(callback: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            callback: callback.into(),
            message: message.into(),
        }
    }

    /// Surface the veto as a non-retryable provider error
    pub fn into_provider_error(self, provider: &str) -> ProviderError {
        ProviderError::Custom {
            provider: provider.to_string(),
            code: "CALLBACK_REJECTED".to_string(),
            message: self.to_string(),
            retryable: false,
        }
    }
}

/// Hooks observing a call. Every method has a no-op default.
#[async_trait]
pub trait Callback: Send + Sync {
    /// Name used in rejection errors and logs
    fn name(&self) -> &str {
        "callback"
    }

    /// Runs before the cache lookup and any provider I/O
    async fn before_request(
        &self,
        _meta: &CallMetadata,
        _request: &ChatRequest,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    async fn on_success(&self, _meta: &CallMetadata, _response: &ChatResponse) {}

    async fn on_failure(&self, _meta: &CallMetadata, _error: &ProviderError) {}

    /// Runs for every chunk a streaming call yields
    async fn on_chunk(&self, _meta: &CallMetadata, _chunk: &ChatStreamChunk) {}
}

/// Ordered set of callbacks owned by a client
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: Vec<Arc<dyn Callback>>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.callbacks.iter().map(|c| c.name()))
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback; it runs after every callback registered before it
    pub fn register(&mut self, callback: Arc<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run every `before_request` hook, stopping at the first rejection
    pub async fn before_request(
        &self,
        meta: &CallMetadata,
        request: &ChatRequest,
    ) -> Result<(), CallbackError> {
        for callback in &self.callbacks {
            if let Err(err) = callback.before_request(meta, request).await {
                tracing::warn!(
                    request_id = %meta.request_id,
                    callback = callback.name(),
                    "request rejected by callback"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    pub async fn on_success(&self, meta: &CallMetadata, response: &ChatResponse) {
        for callback in &self.callbacks {
            callback.on_success(meta, response).await;
        }
    }

    pub async fn on_failure(&self, meta: &CallMetadata, error: &ProviderError) {
        for callback in &self.callbacks {
            callback.on_failure(meta, error).await;
        }
    }

    pub async fn on_chunk(&self, meta: &CallMetadata, chunk: &ChatStreamChunk) {
        for callback in &self.callbacks {
            callback.on_chunk(meta, chunk).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        reject: bool,
    }

    #[async_trait]
    impl Callback for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn before_request(
            &self,
            _meta: &CallMetadata,
            _request: &ChatRequest,
        ) -> Result<(), CallbackError> {
            self.log.lock().unwrap().push(format!("{}:before", self.name));
            if self.reject {
                return Err(CallbackError::new(&self.name, "blocked"));
            }
            Ok(())
        }

        async fn on_failure(&self, _meta: &CallMetadata, _error: &ProviderError) {
            self.log.lock().unwrap().push(format!("{}:failure", self.name));
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>, reject: bool) -> Arc<dyn Callback> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: Arc::clone(log),
            reject,
        })
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        registry.register(recorder("first", &log, false));
        registry.register(recorder("second", &log, false));

        let meta = CallMetadata::new("openai", "gpt-4o");
        let request = ChatRequest::new("gpt-4o", vec![Message::user("hi")]);
        registry.before_request(&meta, &request).await.unwrap();
        registry
            .on_failure(&meta, &ProviderError::cancelled("openai"))
            .await;

        assert_eq!(
            *log.lock().unwrap(),
            ["first:before", "second:before", "first:failure", "second:failure"]
        );
    }

    #[tokio::test]
    async fn rejection_stops_later_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        registry.register(recorder("guard", &log, true));
        registry.register(recorder("audit", &log, false));

        let meta = CallMetadata::new("openai", "gpt-4o");
        let request = ChatRequest::new("gpt-4o", vec![Message::user("hi")]);
        let err = registry.before_request(&meta, &request).await.unwrap_err();

        assert_eq!(err.callback, "guard");
        assert_eq!(*log.lock().unwrap(), ["guard:before"]);

        let provider_err = err.into_provider_error("openai");
        assert!(!provider_err.is_retryable());
    }
}
