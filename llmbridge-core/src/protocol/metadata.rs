//! Per-call metadata threaded explicitly through the client

use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identity and timing of one provider call
#[derive(Debug, Clone)]
pub struct CallMetadata {
    /// Unique request ID for correlation
    pub request_id: Uuid,

    /// Registry name of the provider serving the call
    pub provider: String,

    /// Model as sent to the provider
    pub model: String,

    /// When the call started
    pub started_at: Instant,
}

impl CallMetadata {
    /// Start a new call with a generated request ID
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            provider: provider.into(),
            model: model.into(),
            started_at: Instant::now(),
        }
    }

    /// Time since the call started
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
