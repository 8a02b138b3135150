//! Bearer token providers
//!
//! Adapters that authenticate with short-lived OAuth2 access tokens ask a
//! [`TokenProvider`] for a token before every HTTP call. Providers are shared
//! across calls and must be safe to use concurrently.

mod service_account;

pub use service_account::{
    CredentialError, ServiceAccountCredentials, ServiceAccountTokenProvider, TokenProviderOptions,
    DEFAULT_REFRESH_BUFFER, DEFAULT_SCOPE, DEFAULT_TOKEN_LIFETIME, DEFAULT_TOKEN_URI,
};

use crate::config::SecretString;
use crate::providers::ProviderResult;
use async_trait::async_trait;

/// Source of bearer tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a token valid for at least the provider's refresh buffer
    async fn token(&self) -> ProviderResult<String>;
}

/// Token provider that always returns the same pre-minted token
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<SecretString>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> ProviderResult<String> {
        Ok(self.token.expose_secret().to_string())
    }
}
