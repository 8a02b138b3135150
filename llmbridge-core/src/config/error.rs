//! Configuration error types with detailed error reporting

use crate::auth::CredentialError;
use std::fmt;
use thiserror::Error;

/// Main configuration error type with detailed context
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config from '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in '{path}' at line {}, column {}: {message}", 
            .line.unwrap_or(0), .column.unwrap_or(0))]
    ParseError {
        path: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Environment variable '{var}' not found")]
    EnvVarNotFound { var: String },

    #[error("Invalid credentials for provider '{provider}': {source}")]
    Credentials {
        provider: String,
        #[source]
        source: CredentialError,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Validation error with field path for precise error reporting
#[derive(Debug, Error)]
pub struct ValidationError {
    /// Path to the field that failed validation (e.g., "providers[0].api_key")
    pub field_path: String,
    /// The validation error kind
    pub kind: ValidationErrorKind,
    /// Optional additional context
    pub context: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed at '{}': {}", self.field_path, self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, " ({})", ctx)?;
        }
        Ok(())
    }
}

/// Specific validation error types
#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("required field is missing")]
    RequiredFieldMissing,

    #[error("invalid value: expected {expected}, got {actual}")]
    InvalidValue { expected: String, actual: String },

    #[error("value out of range: {message}")]
    OutOfRange { message: String },

    #[error("invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("duplicate value: {value}")]
    DuplicateValue { value: String },

    #[error("incompatible configuration: {message}")]
    Incompatible { message: String },

    #[error("invalid URL: {message}")]
    InvalidUrl { message: String },

    #[error("unsupported schema version: expected {expected}, got {actual}")]
    InvalidVersion { expected: String, actual: String },

    #[error("{message}")]
    Custom { message: String },
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            context: None,
        }
    }

    /// Add context to the validation error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Helper to create a required field error
    pub fn required(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::RequiredFieldMissing)
    }

    /// Helper to create an invalid value error
    pub fn invalid_value(
        field_path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::InvalidValue {
                expected: expected.into(),
                actual: actual.into(),
            },
        )
    }

    /// Helper to create an out of range error
    pub fn out_of_range(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::OutOfRange {
                message: message.into(),
            },
        )
    }

    /// Helper to create an invalid format error
    pub fn invalid_format(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::InvalidFormat {
                message: message.into(),
            },
        )
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_field_path_and_context() {
        let err = ValidationError::required("providers[1].api_key")
            .with_context("Anthropic requires an API key");
        assert_eq!(
            err.to_string(),
            "Validation failed at 'providers[1].api_key': required field is missing \
             (Anthropic requires an API key)"
        );
    }

    #[test]
    fn parse_error_without_location() {
        let err = ConfigError::ParseError {
            path: "bridge.yaml".to_string(),
            line: None,
            column: None,
            message: "bad".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Parse error in 'bridge.yaml' at line 0, column 0: bad"
        );
    }

    #[test]
    fn validation_error_converts() {
        let err: ConfigError = ValidationError::out_of_range("retry.jitter_factor", "1.5").into();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}