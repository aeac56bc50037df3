//! Read-only pricing catalog mapping (provider, model) to token costs.
//!
//! A single source of truth so admission estimates and post-flight usage
//! charges never drift apart, the way the host keeps one `Budget` struct
//! rather than separate estimate/charge paths.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fallback rate applied to unknown models: `tokens * FALLBACK_USD_PER_TOKEN`.
pub const FALLBACK_USD_PER_TOKEN: f64 = 2e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPrice {
    pub provider: String,
    pub model: String,
    pub tier: ModelTier,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("failed to read pricing catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse pricing catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no model configured for tier {0:?}")]
    NoModelForTier(ModelTier),
}

#[derive(Debug, Clone, Default)]
pub struct PricingCatalog {
    by_model: HashMap<String, ModelPrice>,
    priority_by_tier: HashMap<ModelTier, String>,
}

impl PricingCatalog {
    pub fn new(entries: Vec<ModelPrice>) -> Self {
        let mut by_model = HashMap::new();
        let mut priority_by_tier = HashMap::new();
        for entry in entries {
            priority_by_tier
                .entry(entry.tier)
                .or_insert_with(|| entry.model.clone());
            by_model.insert(entry.model.clone(), entry);
        }
        Self {
            by_model,
            priority_by_tier,
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PricingError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let entries: Vec<ModelPrice> = serde_yaml::from_str(&raw)?;
        Ok(Self::new(entries))
    }

    /// Exact cost for a known model; falls back to `tokens * FALLBACK_USD_PER_TOKEN`
    /// for unknown models, per the documented default.
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.by_model.get(model) {
            Some(price) => {
                (input_tokens as f64 / 1000.0) * price.input_per_1k
                    + (output_tokens as f64 / 1000.0) * price.output_per_1k
            }
            None => (input_tokens + output_tokens) as f64 * FALLBACK_USD_PER_TOKEN,
        }
    }

    /// Cost estimate assuming a 60/40 input/output split of `total_tokens`.
    pub fn estimate(&self, model: &str, total_tokens: u64) -> f64 {
        let input = (total_tokens as f64 * 0.6).round() as u64;
        let output = total_tokens.saturating_sub(input);
        self.cost(model, input, output)
    }

    /// Deterministic model pick for a tier, used by admission when no model
    /// is explicitly requested.
    pub fn priority_one_model(&self, tier: ModelTier) -> Result<&str, PricingError> {
        self.priority_by_tier
            .get(&tier)
            .map(String::as_str)
            .ok_or(PricingError::NoModelForTier(tier))
    }

    pub fn price_for(&self, model: &str) -> Option<&ModelPrice> {
        self.by_model.get(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PricingCatalog {
        PricingCatalog::new(vec![
            ModelPrice {
                provider: "anthropic".into(),
                model: "claude-fast".into(),
                tier: ModelTier::Small,
                input_per_1k: 0.001,
                output_per_1k: 0.002,
            },
            ModelPrice {
                provider: "anthropic".into(),
                model: "claude-large".into(),
                tier: ModelTier::Large,
                input_per_1k: 0.01,
                output_per_1k: 0.03,
            },
        ])
    }

    #[test]
    fn known_model_uses_exact_rates() {
        let cat = catalog();
        let cost = cat.cost("claude-fast", 1000, 1000);
        assert!((cost - 0.003).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_fallback_rate() {
        let cat = catalog();
        let cost = cat.cost("mystery-model", 1000, 0);
        assert!((cost - 1000.0 * FALLBACK_USD_PER_TOKEN).abs() < 1e-12);
    }

    #[test]
    fn estimate_splits_sixty_forty() {
        let cat = catalog();
        let estimate = cat.estimate("claude-fast", 1000);
        let exact = cat.cost("claude-fast", 600, 400);
        assert!((estimate - exact).abs() < 1e-9);
    }

    #[test]
    fn priority_model_is_deterministic_per_tier() {
        let cat = catalog();
        assert_eq!(cat.priority_one_model(ModelTier::Small).unwrap(), "claude-fast");
        assert!(cat.priority_one_model(ModelTier::Medium).is_err());
    }
}
