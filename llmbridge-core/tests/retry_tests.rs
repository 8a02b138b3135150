//! Integration tests for retries, deadlines and cancellation through the client

use async_trait::async_trait;
use llmbridge_core::callbacks::{Callback, CallbackError};
use llmbridge_core::providers::{
    ErrorKind, OpenAIAdapter, ProviderAdapter, ProviderError, ProviderSettings, RetryPolicy,
};
use llmbridge_core::{CallMetadata, ChatRequest, ChatResponse, Client, Message};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter(server: &MockServer) -> Arc<dyn ProviderAdapter> {
    Arc::new(
        OpenAIAdapter::new(
            ProviderSettings::new()
                .with_base_url(format!("{}/v1", server.uri()))
                .with_api_key("sk-test"),
        )
        .unwrap(),
    )
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay_ms: 5,
        max_delay_ms: 20,
        ..RetryPolicy::default()
    }
}

/// Route client logs to the test harness; `RUST_LOG=llmbridge_core=debug` shows retries
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn client(server: &MockServer, policy: RetryPolicy) -> Client {
    init_tracing();
    Client::builder()
        .with_provider(adapter(server))
        .with_retry_policy(policy)
        .build()
        .unwrap()
}

fn request() -> ChatRequest {
    ChatRequest::new("gpt-4o", vec![Message::user("ping")])
}

fn success_body() -> serde_json::Value {
    json!({
        "id": "chatcmpl-ok",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "pong"},
            "finish_reason": "stop"
        }]
    })
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

/// Persistent 503s exhaust the budget after max_retries + 1 attempts
#[tokio::test]
async fn test_retries_exhausted_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"error": {"message": "overloaded", "type": "server_error"}})),
        )
        .mount(&server)
        .await;

    let err = client(&server, fast_policy(2))
        .completion(&request(), &CancellationToken::new(), None)
        .await
        .unwrap_err();

    match err {
        ProviderError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.kind(), ErrorKind::ServiceUnavailable);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(request_count(&server).await, 3);
}

/// Authentication failures are returned after exactly one attempt
#[tokio::test]
async fn test_auth_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}
        })))
        .mount(&server)
        .await;

    let err = client(&server, fast_policy(3))
        .completion(&request(), &CancellationToken::new(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.to_string().contains("Incorrect API key provided"));
    assert_eq!(request_count(&server).await, 1);
}

/// Transient failures followed by success yield the response
#[tokio::test]
async fn test_success_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .with_priority(2)
        .mount(&server)
        .await;

    let response = client(&server, fast_policy(3))
        .completion(&request(), &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(response.choices[0].message.content.as_text(), Some("pong"));
    assert_eq!(request_count(&server).await, 3);
}

/// A token cancelled before the call prevents any provider I/O
#[tokio::test]
async fn test_pre_cancelled_call() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client(&server, fast_policy(3))
        .completion(&request(), &cancel, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(request_count(&server).await, 0);
}

/// Cancelling mid-request aborts the in-flight attempt
#[tokio::test]
async fn test_cancel_during_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = client(&server, fast_policy(3))
        .completion(&request(), &cancel, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// The overall deadline surfaces as a timeout, distinct from cancellation
#[tokio::test]
async fn test_deadline_expiry_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_body())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = client(&server, fast_policy(3))
        .completion(
            &request(),
            &CancellationToken::new(),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
}

/// Rate limits honour Retry-After and still count against the budget
#[tokio::test]
async fn test_rate_limit_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_json(json!({"error": {"message": "Rate limit reached", "type": "requests"}})),
        )
        .mount(&server)
        .await;

    let err = client(&server, fast_policy(1))
        .completion(&request(), &CancellationToken::new(), None)
        .await
        .unwrap_err();

    match err {
        ProviderError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 2);
            assert_eq!(last.kind(), ErrorKind::RateLimit);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[derive(Default)]
struct Audit {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl Callback for Audit {
    fn name(&self) -> &str {
        "audit"
    }

    async fn before_request(
        &self,
        _meta: &CallMetadata,
        request: &ChatRequest,
    ) -> Result<(), CallbackError> {
        self.events.lock().unwrap().push("before".to_string());
        if request.model.contains("forbidden") {
            return Err(CallbackError::new("audit", "model not allowed"));
        }
        Ok(())
    }

    async fn on_success(&self, _meta: &CallMetadata, _response: &ChatResponse) {
        self.events.lock().unwrap().push("success".to_string());
    }

    async fn on_failure(&self, _meta: &CallMetadata, error: &ProviderError) {
        self.events
            .lock()
            .unwrap()
            .push(format!("failure:{:?}", error.kind()));
    }
}

/// Callbacks observe each outcome; a before_request veto skips provider I/O
#[tokio::test]
async fn test_callbacks_observe_outcomes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .mount(&server)
        .await;

    let audit = Arc::new(Audit::default());
    let client = Client::builder()
        .with_provider(adapter(&server))
        .with_callback(audit.clone())
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    client.completion(&request(), &cancel, None).await.unwrap();
    let vetoed = ChatRequest::new("forbidden-model", vec![Message::user("ping")]);
    let err = client.completion(&vetoed, &cancel, None).await.unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(request_count(&server).await, 1);
    assert_eq!(
        *audit.events.lock().unwrap(),
        ["before", "success", "before", "failure:Custom"]
    );
}
