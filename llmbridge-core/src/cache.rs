//! Response cache for non-streaming completions
//!
//! Entries are keyed by a SHA-256 hash of the request fields that determine
//! the response (model, messages, temperature, max_tokens, top_p), formatted
//! as `<namespace>:v1:<hex>`. The client stores serialized [`ChatResponse`]
//! bodies and only consults the cache for non-streaming calls.
//!
//! [`ChatResponse`]: crate::protocol::ChatResponse

use crate::protocol::{ChatRequest, Message};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Version tag embedded in every key; bump when the key document changes
const KEY_VERSION: &str = "v1";

/// Cache errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Backend connection or command error
    #[error("cache backend: {0}")]
    Backend(String),
    /// Serialization error
    #[error("serialization: {0}")]
    Serialization(String),
    /// The cache was closed
    #[error("cache is closed")]
    Closed,
}

/// Byte-oriented cache backend
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a live entry
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store an entry; `None` keeps it until evicted
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    /// Remove an entry if present
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry
    async fn clear(&self) -> Result<(), CacheError>;

    /// Release the backend. Later calls fail with [`CacheError::Closed`].
    async fn close(&self) -> Result<(), CacheError>;
}

#[derive(Serialize)]
struct KeyDocument<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
}

/// Compute the cache key for a request
pub fn cache_key(namespace: &str, request: &ChatRequest) -> Result<String, CacheError> {
    let document = KeyDocument {
        model: &request.model,
        messages: &request.messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
    };
    let json = serde_json::to_vec(&document)
        .map_err(|e| CacheError::Serialization(format!("serialize key: {e}")))?;
    let hash = Sha256::digest(&json);
    Ok(format!("{namespace}:{KEY_VERSION}:{hash:x}"))
}

// ============================================================================
// In-memory backend
// ============================================================================

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    seq: u64,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local cache with per-entry TTL and a capacity bound.
///
/// When full, expired entries are purged first, then the oldest insertion is
/// evicted.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    max_entries: usize,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_entries", &self.max_entries)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` entries
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored entries, including expired ones not yet purged
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                tracing::debug!(cache_key = key, "cache hit");
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                tracing::debug!(cache_key = key, "cache entry expired");
                Ok(None)
            }
            None => {
                tracing::debug!(cache_key = key, "cache miss");
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| entry.is_live(now));
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        tracing::debug!(cache_key = key, ttl_secs = ttl.map(|t| t.as_secs()), "cached response");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::Release);
        self.entries.lock().await.clear();
        Ok(())
    }
}
