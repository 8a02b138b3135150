//! Cost calculation from token usage

use crate::config::BridgeConfig;
use crate::protocol::CompletionUsage;
use std::collections::HashMap;
use thiserror::Error;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Cost calculation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CostError {
    /// The model has no pricing or the response carried no usage
    #[error("pricing unavailable for model '{model}': {reason}")]
    PricingUnavailable { model: String, reason: String },
}

/// Computes the USD cost of one call
pub trait CostCalculator: Send + Sync {
    fn cost(&self, model: &str, usage: Option<&CompletionUsage>) -> Result<f64, CostError>;
}

/// Per-million-token prices for one model, in USD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Pricing table keyed by model id
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect pricing for every configured model that declares both prices
    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut table = Self::new();
        for provider in config.enabled_providers() {
            for model in &provider.models {
                if let Some((input, output)) = model.pricing() {
                    table.insert(model.id.clone(), input, output);
                }
            }
        }
        table
    }

    /// Set the price of a model, replacing any previous entry
    pub fn insert(
        &mut self,
        model: impl Into<String>,
        input_per_million: f64,
        output_per_million: f64,
    ) {
        self.models.insert(
            model.into(),
            ModelPricing {
                input_per_million,
                output_per_million,
            },
        );
    }

    pub fn with_model(
        mut self,
        model: impl Into<String>,
        input_per_million: f64,
        output_per_million: f64,
    ) -> Self {
        self.insert(model, input_per_million, output_per_million);
        self
    }

    /// Pricing for a model, accepting a `provider/` prefix
    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.models.get(model).or_else(|| {
            model
                .split_once('/')
                .and_then(|(_, bare)| self.models.get(bare))
        })
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl CostCalculator for PricingTable {
    fn cost(&self, model: &str, usage: Option<&CompletionUsage>) -> Result<f64, CostError> {
        let usage = usage.ok_or_else(|| CostError::PricingUnavailable {
            model: model.to_string(),
            reason: "response carried no usage".to_string(),
        })?;
        let pricing = self.get(model).ok_or_else(|| CostError::PricingUnavailable {
            model: model.to_string(),
            reason: "model not in pricing table".to_string(),
        })?;

        Ok(f64::from(usage.prompt_tokens) * pricing.input_per_million / TOKENS_PER_UNIT
            + f64::from(usage.completion_tokens) * pricing.output_per_million / TOKENS_PER_UNIT)
    }
}
