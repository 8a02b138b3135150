//! Service-account token provider for Google Cloud.
//!
//! Implements the OAuth 2.0 JWT-bearer grant: an RS256 assertion signed with
//! the account's private key is exchanged at the token endpoint for an access
//! token. Tokens are cached and renewed a refresh buffer before they expire.

use super::TokenProvider;
use crate::providers::{map_http_error, ProviderError, ProviderResult};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::der::pem;
use rsa::pkcs8::PrivateKeyInfo;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Default Google OAuth token endpoint
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Scope requested for Vertex AI and Gemini access
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
/// Lifetime requested for each assertion
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
/// Tokens are renewed this long before they expire
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";
const PKCS8_LABEL: &str = "PRIVATE KEY";
const PROVIDER: &str = "google-oauth";

/// Reasons a service-account credential is rejected at construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("malformed service account JSON: {0}")]
    MalformedJson(String),

    #[error("service account is missing client_email")]
    MissingClientEmail,

    #[error("service account is missing private_key")]
    MissingPrivateKey,

    #[error("private key is not PEM encoded: {0}")]
    NotPem(String),

    #[error("private key is not PKCS#8 (PEM label \"{label}\")")]
    NotPkcs8 { label: String },

    #[error("PKCS#8 private key uses algorithm {oid}, expected RSA")]
    NotRsa { oid: String },

    #[error("invalid RSA private key: {0}")]
    InvalidKey(String),

    #[error("failed to read credentials from {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid token provider options: {0}")]
    InvalidOptions(String),
}

/// Fields of a service-account JSON key file used by the JWT flow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAccountCredentials {
    #[serde(default)]
    pub client_email: String,

    #[serde(default, skip_serializing)]
    pub private_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl ServiceAccountCredentials {
    pub fn new(client_email: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            client_email: client_email.into(),
            private_key: private_key.into(),
            ..Default::default()
        }
    }

    /// Parse a service-account JSON document
    pub fn from_json(json: &str) -> Result<Self, CredentialError> {
        serde_json::from_str(json).map_err(|e| CredentialError::MalformedJson(e.to_string()))
    }

    /// Read and parse a service-account JSON key file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CredentialError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&content)
    }
}

/// Tunables for [`ServiceAccountTokenProvider`]
#[derive(Debug, Clone)]
pub struct TokenProviderOptions {
    /// Requested assertion lifetime (`exp - iat`)
    pub token_lifetime: Duration,

    /// Renew cached tokens this long before expiry
    pub refresh_buffer: Duration,

    /// OAuth scope requested
    pub scope: String,
}

impl Default for TokenProviderOptions {
    fn default() -> Self {
        Self {
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            scope: DEFAULT_SCOPE.to_string(),
        }
    }
}

impl TokenProviderOptions {
    /// A lifetime at or below the buffer would make every cached token stale.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.token_lifetime <= self.refresh_buffer {
            return Err(CredentialError::InvalidOptions(format!(
                "token lifetime {}s must exceed refresh buffer {}s",
                self.token_lifetime.as_secs(),
                self.refresh_buffer.as_secs()
            )));
        }
        if self.scope.trim().is_empty() {
            return Err(CredentialError::InvalidOptions("scope is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct JwtHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Service-account token provider with a shared, double-checked cache
pub struct ServiceAccountTokenProvider {
    client_email: String,
    signing_key: SigningKey<Sha256>,
    token_uri: String,
    options: TokenProviderOptions,
    refresh_buffer: TimeDelta,
    http: reqwest::Client,
    cache: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenProvider")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokenProvider {
    /// Build a provider from parsed credentials with default options
    pub fn new(credentials: ServiceAccountCredentials) -> Result<Self, CredentialError> {
        Self::with_options(credentials, TokenProviderOptions::default())
    }

    /// Build a provider from a service-account JSON document
    pub fn from_json(json: &str) -> Result<Self, CredentialError> {
        Self::new(ServiceAccountCredentials::from_json(json)?)
    }

    /// Build a provider from a service-account JSON key file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        Self::new(ServiceAccountCredentials::from_file(path)?)
    }

    /// Build a provider with explicit options
    pub fn with_options(
        credentials: ServiceAccountCredentials,
        options: TokenProviderOptions,
    ) -> Result<Self, CredentialError> {
        options.validate()?;
        if credentials.client_email.trim().is_empty() {
            return Err(CredentialError::MissingClientEmail);
        }
        if credentials.private_key.trim().is_empty() {
            return Err(CredentialError::MissingPrivateKey);
        }

        let key = parse_rsa_private_key(&credentials.private_key)?;
        let refresh_buffer = TimeDelta::from_std(options.refresh_buffer)
            .map_err(|e| CredentialError::InvalidOptions(e.to_string()))?;
        let token_uri = credentials
            .token_uri
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

        Ok(Self {
            client_email: credentials.client_email,
            signing_key: SigningKey::<Sha256>::new(key),
            token_uri,
            options,
            refresh_buffer,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        })
    }

    /// Use a specific HTTP client for token exchanges
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Service-account email used as the assertion issuer
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Token endpoint the assertion is exchanged at
    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }

    /// Build a signed RS256 assertion issued at `now`
    pub fn create_jwt(&self, now: DateTime<Utc>) -> ProviderResult<String> {
        let header = JwtHeader {
            alg: "RS256",
            typ: "JWT",
        };
        let iat = now.timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: &self.options.scope,
            aud: &self.token_uri,
            iat,
            exp: iat + self.options.token_lifetime.as_secs() as i64,
        };

        let header = encode_segment(&header)?;
        let claims = encode_segment(&claims)?;
        let signing_input = format!("{header}.{claims}");
        let signature = self
            .signing_key
            .try_sign(signing_input.as_bytes())
            .map_err(|e| ProviderError::configuration(PROVIDER, format!("failed to sign JWT: {e}")))?;

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    fn usable(&self, cached: &Option<CachedToken>, now: DateTime<Utc>) -> Option<String> {
        cached
            .as_ref()
            .filter(|token| now + self.refresh_buffer < token.expires_at)
            .map(|token| token.token.clone())
    }

    async fn exchange(&self) -> ProviderResult<CachedToken> {
        let now = Utc::now();
        let assertion = self.create_jwt(now)?;
        let body = format!("grant_type={JWT_BEARER_GRANT}&assertion={assertion}");

        tracing::info!(
            client_email = %self.client_email,
            token_uri = %self.token_uri,
            "exchanging service account assertion for access token"
        );

        let response = self
            .http
            .post(&self.token_uri)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, &e))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "token exchange rejected");
            return Err(map_http_error(
                PROVIDER,
                status.as_u16(),
                None,
                &format!("token exchange failed with status {status}: {text}"),
            ));
        }

        let parsed: TokenResponse = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(error = %e, "failed to parse token response");
            ProviderError::parse(PROVIDER, format!("invalid token response: {e}"))
        })?;

        let lifetime = parsed
            .expires_in
            .unwrap_or(self.options.token_lifetime.as_secs() as i64);
        let expires_at = Some(lifetime)
            .filter(|secs| *secs > 0)
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or_else(|| {
                tracing::error!(expires_in = lifetime, "token response has unusable expiry");
                ProviderError::parse(PROVIDER, format!("invalid expires_in in token response: {lifetime}"))
            })?;

        Ok(CachedToken {
            token: parsed.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn token(&self) -> ProviderResult<String> {
        {
            let cached = self.cache.read().await;
            if let Some(token) = self.usable(&cached, Utc::now()) {
                tracing::debug!(client_email = %self.client_email, "access token cache hit");
                return Ok(token);
            }
        }

        let mut slot = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.usable(&slot, Utc::now()) {
            tracing::debug!(client_email = %self.client_email, "access token refreshed concurrently");
            return Ok(token);
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *slot = Some(fresh);
        Ok(token)
    }
}

fn encode_segment<T: Serialize>(value: &T) -> ProviderResult<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| ProviderError::configuration(PROVIDER, format!("failed to encode JWT: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Parse a PKCS#8 PEM holding an RSA private key
fn parse_rsa_private_key(key: &str) -> Result<RsaPrivateKey, CredentialError> {
    // Key files embedded in JSON sometimes keep literal "\n" escapes
    let document = format!("{}\n", key.trim().replace("\\n", "\n"));

    let label = pem::decode_label(document.as_bytes())
        .map_err(|e| CredentialError::NotPem(e.to_string()))?;
    if label != PKCS8_LABEL {
        return Err(CredentialError::NotPkcs8 {
            label: label.to_string(),
        });
    }
    let (_, der) =
        pem::decode_vec(document.as_bytes()).map_err(|e| CredentialError::NotPem(e.to_string()))?;

    let info = PrivateKeyInfo::try_from(der.as_slice())
        .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
    let oid = info.algorithm.oid.to_string();
    if oid != RSA_ENCRYPTION_OID {
        return Err(CredentialError::NotRsa { oid });
    }

    RsaPrivateKey::try_from(info).map_err(|e| CredentialError::InvalidKey(e.to_string()))
}
