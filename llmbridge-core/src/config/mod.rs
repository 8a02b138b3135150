//! Configuration module for llmbridge
//!
//! This module provides the configuration schema and validation:
//! - YAML and JSON loading with `${VAR}` environment interpolation
//! - Field-path validation errors
//! - [`SecretString`] for keys that must never reach logs
//!
//! A validated [`BridgeConfig`] becomes a client through
//! `ClientBuilder::from_config`.

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::{interpolate_env_vars, referenced_env_vars};
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    BridgeConfig, CacheConfig, ConnectionConfig, ModelConfig, ProviderConfig, SUPPORTED_VERSION,
};
pub use secrets::SecretString;
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<BridgeConfig> {
    let path = path.as_ref();
    let interpolated = read_interpolated(path)?;

    let config: BridgeConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: path.to_string_lossy().to_string(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<BridgeConfig> {
    let path = path.as_ref();
    let interpolated = read_interpolated(path)?;

    let config: BridgeConfig =
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: path.to_string_lossy().to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Load a configuration file, choosing the format by extension
pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<BridgeConfig> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => load_from_yaml(path),
        Some("json") => load_from_json(path),
        other => Err(ConfigError::Invalid {
            message: format!(
                "unsupported config extension {:?} for '{}'",
                other.unwrap_or(""),
                path.display()
            ),
        }),
    }
}

fn read_interpolated(path: &Path) -> ConfigResult<String> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;

    tracing::debug!(
        path = %path.display(),
        vars = ?referenced_env_vars(&content)?,
        "interpolating config"
    );
    interpolate_env_vars(&content)
}
