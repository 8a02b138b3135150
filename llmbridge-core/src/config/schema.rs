//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use super::secrets::SecretString;
use crate::providers::{ProviderKind, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// Provider that serves model names without a `provider/` prefix;
    /// defaults to the first enabled provider
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Configured LLM providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Retry policy applied to every non-streaming call
    #[serde(default)]
    pub retry: RetryPolicy,

    /// HTTP connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Response cache; absent means no caching
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Custom metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One provider entry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Unique provider name, also the model routing prefix
    pub name: String,

    /// Wire protocol (`openai`, `anthropic`, `gemini`)
    #[serde(rename = "type")]
    pub kind: ProviderKind,

    /// API key (supports environment variable interpolation)
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Override of the protocol's default base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Service-account JSON key file, for Gemini bearer auth
    #[serde(default)]
    pub service_account_file: Option<PathBuf>,

    /// Output cap applied when a request leaves `max_tokens` unset
    #[serde(default)]
    pub default_max_tokens: Option<u32>,

    /// Extra headers sent with every request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Models served by this provider, with optional pricing
    #[serde(default)]
    pub models: Vec<ModelConfig>,

    /// Whether this provider is registered at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Model configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Model identifier as sent to the provider (e.g., "gpt-4o")
    pub id: String,

    /// Maximum context tokens
    #[serde(default)]
    pub max_context_tokens: Option<u32>,

    /// Cost per million input tokens (in USD)
    #[serde(default)]
    pub input_cost_per_million: Option<f64>,

    /// Cost per million output tokens (in USD)
    #[serde(default)]
    pub output_cost_per_million: Option<f64>,
}

/// Connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Maximum idle connections per host
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// Idle connection keep-alive in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Largest non-streaming response body accepted, in bytes
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    /// User agent override
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            max_idle_per_host: default_max_idle(),
            keepalive_secs: default_keepalive(),
            max_response_bytes: default_max_response_bytes(),
            user_agent: None,
        }
    }
}

/// In-memory response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Key namespace
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,

    /// Entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Entry count limit
    #[serde(default = "default_cache_capacity")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_cache_namespace(),
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_capacity(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool { true }
fn default_connect_timeout() -> u64 { 10_000 }
fn default_request_timeout() -> u64 { 120_000 }
fn default_max_idle() -> usize { 10 }
fn default_keepalive() -> u64 { 90 }
fn default_max_response_bytes() -> usize { 10 * 1024 * 1024 }
fn default_cache_namespace() -> String { "llmbridge".to_string() }
fn default_cache_ttl() -> u64 { 3600 }
fn default_cache_capacity() -> usize { 1024 }

/// Schema versions this crate understands
pub const SUPPORTED_VERSION: &str = "0.1";

impl BridgeConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_empty() {
            return Err(ValidationError::required("version"));
        }
        if self.version != SUPPORTED_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::InvalidVersion {
                    expected: SUPPORTED_VERSION.to_string(),
                    actual: self.version.clone(),
                },
            ));
        }

        if self.providers.is_empty() {
            return Err(ValidationError::required("providers")
                .with_context("At least one provider must be configured"));
        }

        let mut seen_names = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if !seen_names.insert(&provider.name) {
                return Err(ValidationError::new(
                    format!("providers[{i}].name"),
                    ValidationErrorKind::DuplicateValue {
                        value: provider.name.clone(),
                    },
                ));
            }
            provider.validate(&format!("providers[{i}]"))?;
        }

        if let Some(default) = &self.default_provider {
            if !self.providers.iter().any(|p| p.enabled && &p.name == default) {
                return Err(ValidationError::invalid_value(
                    "default_provider",
                    "name of an enabled provider",
                    default.clone(),
                ));
            }
        }

        validate_retry(&self.retry, "retry")?;
        self.connection.validate("connection")?;
        if let Some(cache) = &self.cache {
            cache.validate("cache")?;
        }

        Ok(())
    }

    /// Providers that will be registered, in declaration order
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }
}

impl ProviderConfig {
    /// Validate provider configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::required(format!("{path}.name")));
        }
        if self.name.contains('/') {
            return Err(ValidationError::invalid_format(
                format!("{path}.name"),
                "must not contain '/', which separates provider and model",
            ));
        }

        if let Some(base_url) = &self.base_url {
            match url::Url::parse(base_url) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
                Ok(url) => {
                    return Err(ValidationError::new(
                        format!("{path}.base_url"),
                        ValidationErrorKind::InvalidUrl {
                            message: format!(
                                "URL scheme must be http or https, got: {}",
                                url.scheme()
                            ),
                        },
                    ));
                }
                Err(e) => {
                    return Err(ValidationError::new(
                        format!("{path}.base_url"),
                        ValidationErrorKind::InvalidUrl {
                            message: e.to_string(),
                        },
                    ));
                }
            }
        }

        let has_key = self.api_key.as_ref().is_some_and(|key| !key.is_empty());
        match self.kind {
            ProviderKind::Anthropic if !has_key => {
                return Err(ValidationError::required(format!("{path}.api_key"))
                    .with_context("Anthropic requires an API key"));
            }
            ProviderKind::Gemini if !has_key && self.service_account_file.is_none() => {
                return Err(ValidationError::required(format!("{path}.api_key"))
                    .with_context("Gemini requires an API key or service_account_file"));
            }
            ProviderKind::OpenAI | ProviderKind::Anthropic
                if self.service_account_file.is_some() =>
            {
                return Err(ValidationError::new(
                    format!("{path}.service_account_file"),
                    ValidationErrorKind::Incompatible {
                        message: "service accounts are only supported for gemini".to_string(),
                    },
                ));
            }
            _ => {}
        }

        if self.default_max_tokens == Some(0) {
            return Err(ValidationError::out_of_range(
                format!("{path}.default_max_tokens"),
                "Must be greater than 0",
            ));
        }

        let mut seen_model_ids = HashSet::new();
        for (i, model) in self.models.iter().enumerate() {
            let model_path = format!("{path}.models[{i}]");
            if !seen_model_ids.insert(&model.id) {
                return Err(ValidationError::new(
                    format!("{model_path}.id"),
                    ValidationErrorKind::DuplicateValue {
                        value: model.id.clone(),
                    },
                ));
            }
            model.validate(&model_path)?;
        }

        Ok(())
    }
}

impl ModelConfig {
    /// Validate model configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::required(format!("{path}.id")));
        }
        if self.max_context_tokens == Some(0) {
            return Err(ValidationError::out_of_range(
                format!("{path}.max_context_tokens"),
                "Must be greater than 0",
            ));
        }
        for (field, cost) in [
            ("input_cost_per_million", self.input_cost_per_million),
            ("output_cost_per_million", self.output_cost_per_million),
        ] {
            if cost.is_some_and(|cost| cost < 0.0 || !cost.is_finite()) {
                return Err(ValidationError::out_of_range(
                    format!("{path}.{field}"),
                    "Must be a non-negative number",
                ));
            }
        }
        Ok(())
    }

    /// Both prices, when the model is fully priced
    pub fn pricing(&self) -> Option<(f64, f64)> {
        Some((self.input_cost_per_million?, self.output_cost_per_million?))
    }
}

impl ConnectionConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.connect_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{path}.connect_timeout_ms"),
                "Must be greater than 0",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{path}.request_timeout_ms"),
                "Must be greater than 0",
            ));
        }
        if self.max_response_bytes == 0 {
            return Err(ValidationError::out_of_range(
                format!("{path}.max_response_bytes"),
                "Must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.namespace.is_empty() {
            return Err(ValidationError::required(format!("{path}.namespace")));
        }
        if self.ttl_secs == 0 {
            return Err(ValidationError::out_of_range(
                format!("{path}.ttl_secs"),
                "Must be greater than 0",
            ));
        }
        if self.max_entries == 0 {
            return Err(ValidationError::out_of_range(
                format!("{path}.max_entries"),
                "Must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Validate retry policy
fn validate_retry(policy: &RetryPolicy, path: &str) -> Result<(), ValidationError> {
    if policy.initial_delay_ms == 0 {
        return Err(ValidationError::out_of_range(
            format!("{path}.initial_delay_ms"),
            "Must be greater than 0",
        ));
    }
    if policy.max_delay_ms < policy.initial_delay_ms {
        return Err(ValidationError::new(
            format!("{path}.max_delay_ms"),
            ValidationErrorKind::Incompatible {
                message: "Must be >= initial_delay_ms".to_string(),
            },
        ));
    }
    if policy.exponential_base < 1.0 {
        return Err(ValidationError::out_of_range(
            format!("{path}.exponential_base"),
            "Must be at least 1.0",
        ));
    }
    if !(0.0..=1.0).contains(&policy.jitter_factor) {
        return Err(ValidationError::out_of_range(
            format!("{path}.jitter_factor"),
            "Must be between 0.0 and 1.0",
        ));
    }
    if policy.timeout_ms == Some(0) {
        return Err(ValidationError::out_of_range(
            format!("{path}.timeout_ms"),
            "Must be greater than 0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind,
            api_key: Some(SecretString::new("key")),
            base_url: None,
            service_account_file: None,
            default_max_tokens: None,
            headers: HashMap::new(),
            models: Vec::new(),
            enabled: true,
        }
    }

    fn config(providers: Vec<ProviderConfig>) -> BridgeConfig {
        BridgeConfig {
            version: "0.1".to_string(),
            default_provider: None,
            providers,
            retry: RetryPolicy::default(),
            connection: ConnectionConfig::default(),
            cache: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn rejects_unknown_version() {
        let mut cfg = config(vec![provider("openai", ProviderKind::OpenAI)]);
        cfg.version = "2.0".to_string();
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field_path, "version");
    }

    #[test]
    fn rejects_duplicate_provider_names() {
        let cfg = config(vec![
            provider("main", ProviderKind::OpenAI),
            provider("main", ProviderKind::Anthropic),
        ]);
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field_path, "providers[1].name");
    }

    #[test]
    fn anthropic_needs_a_key() {
        let mut anthropic = provider("anthropic", ProviderKind::Anthropic);
        anthropic.api_key = None;
        let err = config(vec![anthropic]).validate().unwrap_err();
        assert_eq!(err.field_path, "providers[0].api_key");
    }

    #[test]
    fn gemini_accepts_service_account_instead_of_key() {
        let mut gemini = provider("vertex", ProviderKind::Gemini);
        gemini.api_key = None;
        gemini.service_account_file = Some(PathBuf::from("/secrets/sa.json"));
        assert!(config(vec![gemini]).validate().is_ok());
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mut openai = provider("openai", ProviderKind::OpenAI);
        openai.base_url = Some("ftp://example.com".to_string());
        let err = config(vec![openai]).validate().unwrap_err();
        assert_eq!(err.field_path, "providers[0].base_url");
    }

    #[test]
    fn default_provider_must_exist() {
        let mut cfg = config(vec![provider("openai", ProviderKind::OpenAI)]);
        cfg.default_provider = Some("anthropic".to_string());
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field_path, "default_provider");
    }

    #[test]
    fn rejects_out_of_range_jitter() {
        let mut cfg = config(vec![provider("openai", ProviderKind::OpenAI)]);
        cfg.retry.jitter_factor = 1.5;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.field_path, "retry.jitter_factor");
    }

    #[test]
    fn pricing_requires_both_sides() {
        let model = ModelConfig {
            id: "gpt-4o".to_string(),
            max_context_tokens: None,
            input_cost_per_million: Some(2.5),
            output_cost_per_million: None,
        };
        assert_eq!(model.pricing(), None);
    }
}
