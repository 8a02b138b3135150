//! Environment variable interpolation for configuration
//!
//! `${VAR}` is replaced by the variable's value and `${VAR:-fallback}` falls
//! back to the literal text when the variable is unset. A reference to an
//! unset variable without a fallback is an error.

use super::error::ConfigError;
use regex::Regex;
use std::env;

const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}";

fn env_var_pattern() -> Result<Regex, ConfigError> {
    Regex::new(ENV_VAR_PATTERN).map_err(|e| ConfigError::Invalid {
        message: format!("invalid interpolation pattern: {e}"),
    })
}

/// Interpolate environment variables in a configuration string
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    let pattern = env_var_pattern()?;
    let mut result = String::with_capacity(content.len());
    let mut last = 0;

    for cap in pattern.captures_iter(content) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = &cap[1];

        let value = match (env::var(var_name), cap.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(fallback)) => fallback.as_str().to_string(),
            (Err(_), None) => {
                return Err(ConfigError::EnvVarNotFound {
                    var: var_name.to_string(),
                })
            }
        };

        result.push_str(&content[last..full_match.start()]);
        result.push_str(&value);
        last = full_match.end();
    }
    result.push_str(&content[last..]);

    Ok(result)
}

/// Names of every variable referenced in `text`, in order of appearance
pub fn referenced_env_vars(text: &str) -> Result<Vec<String>, ConfigError> {
    Ok(env_var_pattern()?
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars() {
        env::set_var("LLMBRIDGE_TEST_VAR", "test_value");

        let content = "api_key: ${LLMBRIDGE_TEST_VAR}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "api_key: test_value");

        env::remove_var("LLMBRIDGE_TEST_VAR");
    }

    #[test]
    fn test_missing_env_var() {
        let content = "api_key: ${LLMBRIDGE_MISSING_VAR}";
        let result = interpolate_env_vars(content);

        match result {
            Err(ConfigError::EnvVarNotFound { var }) => assert_eq!(var, "LLMBRIDGE_MISSING_VAR"),
            other => panic!("Expected EnvVarNotFound error, got {other:?}"),
        }
    }

    #[test]
    fn test_fallback_value() {
        let content = "base_url: ${LLMBRIDGE_UNSET_URL:-http://localhost:8080}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "base_url: http://localhost:8080");
    }

    #[test]
    fn test_multiple_env_vars() {
        env::set_var("LLMBRIDGE_VAR1", "value1");
        env::set_var("LLMBRIDGE_VAR2", "value2");

        let content = "key1: ${LLMBRIDGE_VAR1}, key2: ${LLMBRIDGE_VAR2}, again: ${LLMBRIDGE_VAR1}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "key1: value1, key2: value2, again: value1");

        env::remove_var("LLMBRIDGE_VAR1");
        env::remove_var("LLMBRIDGE_VAR2");
    }

    #[test]
    fn test_lowercase_names_are_left_alone() {
        let content = "literal: ${not_a_var}";
        assert_eq!(interpolate_env_vars(content).unwrap(), content);
    }

    #[test]
    fn test_referenced_env_vars() {
        let vars =
            referenced_env_vars("api_key: ${OPENAI_API_KEY}, url: ${API_BASE_URL:-x}").unwrap();
        assert_eq!(vars, ["OPENAI_API_KEY", "API_BASE_URL"]);
    }
}
