//! Token estimation and cost calculation.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TokenCounter`] | Trait for token counting implementations |
//! | [`CharacterEstimator`] | Fast character-based approximation (4 bytes ≈ 1 token) |
//! | [`CostCalculator`] | Pluggable `(provider, model, in, out) -> money` mapping |
//! | [`NullCostCalculator`] | Zero-cost calculator for deployments without pricing data |
//! | [`StaticCostCalculator`] | Table-driven calculator with optional built-in prices |

mod counter;
mod pricing;

pub use counter::{
    byte_threshold_for_tokens, estimate_tokens_from_bytes, CharacterEstimator, TokenCounter,
    BYTES_PER_TOKEN,
};
pub use pricing::{
    CostBreakdown, CostCalculator, ModelPricing, NullCostCalculator, StaticCostCalculator,
    DEFAULT_CURRENCY,
};
