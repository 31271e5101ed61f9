//! Model pricing and the pluggable cost calculator used by the metrics hub.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub currency: String,
}

impl ModelPricing {
    pub fn new(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_1k: input,
            output_cost_per_1k: output,
            currency: DEFAULT_CURRENCY.into(),
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_string();
        self
    }

    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        let ic = (input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let oc = (output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        CostBreakdown {
            input_cost: ic,
            output_cost: oc,
            total_cost: ic + oc,
            currency: self.currency.clone(),
        }
    }

    pub fn gpt_4o() -> Self {
        Self::new("gpt-4o", 0.005, 0.015)
    }
    pub fn gpt_4o_mini() -> Self {
        Self::new("gpt-4o-mini", 0.00015, 0.0006)
    }
    pub fn claude_35_sonnet() -> Self {
        Self::new("claude-3-5-sonnet", 0.003, 0.015)
    }
    pub fn claude_3_haiku() -> Self {
        Self::new("claude-3-haiku", 0.00025, 0.00125)
    }

    pub fn for_model(model: &str) -> Option<Self> {
        let m = model.to_lowercase();
        if m.contains("gpt-4o-mini") {
            Some(Self::gpt_4o_mini())
        } else if m.contains("gpt-4o") {
            Some(Self::gpt_4o())
        } else if m.contains("claude-3-5-sonnet") {
            Some(Self::claude_35_sonnet())
        } else if m.contains("claude-3-haiku") {
            Some(Self::claude_3_haiku())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

impl CostBreakdown {
    pub fn zero() -> Self {
        Self {
            input_cost: 0.0,
            output_cost: 0.0,
            total_cost: 0.0,
            currency: DEFAULT_CURRENCY.into(),
        }
    }

    pub fn format(&self) -> String {
        format!("{} {:.6}", self.currency, self.total_cost)
    }
}

/// Maps token usage to money.
pub trait CostCalculator: Send + Sync {
    fn calculate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> CostBreakdown;

    /// Per-1k pricing, `None` when the model is unknown.
    fn pricing(&self, provider: &str, model: &str) -> Option<ModelPricing>;
}

/// Calculator for deployments without pricing data: everything costs zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCostCalculator;

impl CostCalculator for NullCostCalculator {
    fn calculate(&self, _: &str, _: &str, _: u64, _: u64) -> CostBreakdown {
        CostBreakdown::zero()
    }

    fn pricing(&self, _: &str, _: &str) -> Option<ModelPricing> {
        None
    }
}

/// Table-driven calculator. Explicit `(provider, model)` entries win; otherwise the
/// built-in model table is consulted when `use_builtin` is set.
#[derive(Debug, Clone, Default)]
pub struct StaticCostCalculator {
    table: HashMap<(String, String), ModelPricing>,
    use_builtin: bool,
}

impl StaticCostCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_prices(mut self) -> Self {
        self.use_builtin = true;
        self
    }

    pub fn with_price(mut self, provider: &str, pricing: ModelPricing) -> Self {
        self.table
            .insert((provider.to_string(), pricing.model.clone()), pricing);
        self
    }
}

impl CostCalculator for StaticCostCalculator {
    fn calculate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> CostBreakdown {
        self.pricing(provider, model)
            .map(|p| p.calculate_cost(input_tokens, output_tokens))
            .unwrap_or_else(CostBreakdown::zero)
    }

    fn pricing(&self, provider: &str, model: &str) -> Option<ModelPricing> {
        if let Some(p) = self.table.get(&(provider.to_string(), model.to_string())) {
            return Some(p.clone());
        }
        if self.use_builtin {
            ModelPricing::for_model(model)
        } else {
            None
        }
    }
}
