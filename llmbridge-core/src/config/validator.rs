//! Configuration validation utilities

use super::error::{ValidationError, ValidationErrorKind};
use super::schema::BridgeConfig;

/// Header names that carry credentials and must come from `api_key` or a
/// service account instead of `headers`
const SENSITIVE_MARKERS: &[&str] = &[
    "api_key",
    "api-key",
    "apikey",
    "authorization",
    "secret",
    "token",
    "password",
    "credential",
];

/// Configuration validator with rules beyond the schema's own checks
#[derive(Debug, Clone, Default)]
pub struct ConfigValidator {
    /// Skip filesystem checks (for configs validated away from their host)
    skip_file_checks: bool,
}

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not require referenced key files to exist
    pub fn without_file_checks(mut self) -> Self {
        self.skip_file_checks = true;
        self
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &BridgeConfig) -> Result<(), ValidationError> {
        config.validate()?;

        self.validate_enabled(config)?;
        self.validate_headers(config)?;
        if !self.skip_file_checks {
            self.validate_key_files(config)?;
        }

        Ok(())
    }

    fn validate_enabled(&self, config: &BridgeConfig) -> Result<(), ValidationError> {
        if config.enabled_providers().next().is_none() {
            return Err(ValidationError::new(
                "providers",
                ValidationErrorKind::Custom {
                    message: "At least one provider must be enabled".to_string(),
                },
            ));
        }
        Ok(())
    }

    fn validate_headers(&self, config: &BridgeConfig) -> Result<(), ValidationError> {
        for (i, provider) in config.providers.iter().enumerate() {
            for name in provider.headers.keys() {
                if self.is_sensitive_field(name) {
                    return Err(ValidationError::new(
                        format!("providers[{i}].headers.{name}"),
                        ValidationErrorKind::Incompatible {
                            message: "credentials belong in api_key or service_account_file"
                                .to_string(),
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_key_files(&self, config: &BridgeConfig) -> Result<(), ValidationError> {
        for (i, provider) in config.enabled_providers().enumerate() {
            if let Some(path) = &provider.service_account_file {
                if !path.is_file() {
                    return Err(ValidationError::invalid_value(
                        format!("providers[{i}].service_account_file"),
                        "path to a readable file",
                        path.display().to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Check if a field name appears to contain sensitive information
    pub fn is_sensitive_field(&self, field_name: &str) -> bool {
        let lower = field_name.to_ascii_lowercase();
        SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
    }
}
