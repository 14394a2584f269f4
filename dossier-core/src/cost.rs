//! Token cost calculation.
//!
//! Prices are USD per one million tokens, looked up by model id. Dated
//! snapshots such as `o3-deep-research-2025-06-26` resolve to their undated
//! family entry. Unknown models cost nothing rather than failing.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::types::{ResearchCost, TokenUsage};

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Price of one model, in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Cost of the given usage at this price.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.input_per_million * input_tokens as f64 / TOKENS_PER_UNIT
            + self.output_per_million * output_tokens as f64 / TOKENS_PER_UNIT
    }
}

/// Per-model price lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::empty()
            .with_price("gpt-4.1", ModelPrice::new(2.5, 10.0))
            .with_price("o3-deep-research", ModelPrice::new(10.0, 40.0))
            .with_price("o4-mini-deep-research", ModelPrice::new(2.0, 8.0))
    }
}

impl PriceTable {
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Add or replace the price for a model.
    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.insert(model, price);
        self
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into().to_ascii_lowercase(), price);
    }

    /// Find the price for a model id, falling back to its undated family.
    pub fn lookup(&self, model: &str) -> Option<&ModelPrice> {
        let model = model.trim().to_ascii_lowercase();
        self.prices
            .get(&model)
            .or_else(|| strip_date_suffix(&model).and_then(|family| self.prices.get(family)))
    }

    /// Cost in USD. Zero for models with no price.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
        self.lookup(model)
            .map(|price| price.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// Build the cost record stored on a completed job.
    pub fn research_cost(&self, usage: &TokenUsage, model: &str) -> ResearchCost {
        ResearchCost {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_cost: self.cost(usage.input_tokens, usage.output_tokens, model),
        }
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelPrice)> {
        self.prices.iter().map(|(k, v)| (k.as_str(), v))
    }
}

static DEFAULT_PRICES: LazyLock<PriceTable> = LazyLock::new(PriceTable::default);

/// Cost in USD using the built-in price table.
pub fn cost(input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
    DEFAULT_PRICES.cost(input_tokens, output_tokens, model)
}

/// Format a USD amount for display.
pub fn format_cost(total: f64) -> String {
    if total > 0.0 && total < 0.01 {
        format!("${total:.4}")
    } else {
        format!("${total:.2}")
    }
}

/// `o3-deep-research-2025-06-26` → `o3-deep-research`.
fn strip_date_suffix(model: &str) -> Option<&str> {
    let bytes = model.as_bytes();
    // "-YYYY-MM-DD" is 11 bytes
    if bytes.len() <= 11 {
        return None;
    }
    let (family, suffix) = model.split_at(model.len() - 11);
    let s = suffix.as_bytes();
    let is_date = s[0] == b'-'
        && s[5] == b'-'
        && s[8] == b'-'
        && [1, 2, 3, 4, 6, 7, 9, 10]
            .iter()
            .all(|&i| s[i].is_ascii_digit());
    is_date.then_some(family)
}
