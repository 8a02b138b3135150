//! Per-client adapter registry
//!
//! Adapters are registered under their name and shared as `Arc`s. A model
//! string of the form `name/model` selects the adapter by prefix; bare model
//! names go to the default adapter.

use super::adapter::ProviderAdapter;
use super::error::{ProviderError, ProviderResult};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    default: Option<String>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("adapters", &names)
            .field("default", &self.default)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one.
    /// The first registered adapter becomes the default.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let name = adapter.name().to_string();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.adapters.insert(name, adapter);
    }

    /// Choose which adapter handles bare model names
    pub fn set_default(&mut self, name: &str) -> ProviderResult<()> {
        if !self.adapters.contains_key(name) {
            return Err(ProviderError::configuration(
                name,
                format!("cannot make unregistered provider '{name}' the default"),
            ));
        }
        self.default = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Pick the adapter for a model string
    pub fn resolve(&self, model: &str) -> ProviderResult<Arc<dyn ProviderAdapter>> {
        if let Some((prefix, _)) = model.split_once('/') {
            if let Some(adapter) = self.adapters.get(prefix) {
                return Ok(Arc::clone(adapter));
            }
        }

        self.default
            .as_deref()
            .and_then(|name| self.adapters.get(name))
            .cloned()
            .ok_or_else(|| {
                ProviderError::configuration(
                    "registry",
                    format!("no provider registered for model '{model}'"),
                )
            })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ErrorKind, ProviderKind, ProviderSettings};

    fn adapter(kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
        Arc::from(
            kind.create_adapter(ProviderSettings::new().with_api_key("key"))
                .unwrap(),
        )
    }

    #[test]
    fn resolves_by_prefix_then_default() {
        let mut registry = ProviderRegistry::new();
        registry.register(adapter(ProviderKind::OpenAI));
        registry.register(adapter(ProviderKind::Anthropic));

        assert_eq!(registry.resolve("anthropic/claude-3-5-sonnet").unwrap().name(), "anthropic");
        assert_eq!(registry.resolve("gpt-4o").unwrap().name(), "openai");
        // Unknown prefixes are part of the model name (e.g. OpenRouter ids)
        assert_eq!(registry.resolve("meta-llama/llama-3").unwrap().name(), "openai");

        registry.set_default("anthropic").unwrap();
        assert_eq!(registry.resolve("claude-3-haiku").unwrap().name(), "anthropic");
        assert_eq!(registry.names(), ["anthropic", "openai"]);
    }

    #[test]
    fn empty_registry_fails_to_resolve() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("gpt-4o").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(registry.is_empty());
    }

    #[test]
    fn default_must_be_registered() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.set_default("gemini").is_err());
    }
}
