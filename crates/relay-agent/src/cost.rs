use regex::Regex;
use relay_llm::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Maps a model identifier and its token usage to a monetary cost.
pub trait PricingFunction: Send + Sync {
    fn cost(&self, model: &str, usage: &Usage) -> f64;
}

impl<F> PricingFunction for F
where
    F: Fn(&str, &Usage) -> f64 + Send + Sync,
{
    fn cost(&self, model: &str, usage: &Usage) -> f64 {
        self(model, usage)
    }
}

/// Price per one million tokens.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

/// Static per-model price list. Unknown models cost nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    models: HashMap<String, ModelPricing>,
}

static DATE_SUFFIX_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"-\d{4}-?\d{2}-?\d{2}$").ok());

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>, input: f64, output: f64) -> Self {
        self.insert(model, ModelPricing { input, output });
        self
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model.into().to_lowercase(), pricing);
    }

    /// Parse a JSON object of `{"model": {"input": .., "output": ..}}`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let parsed: HashMap<String, ModelPricing> = serde_json::from_str(raw)?;
        let mut table = Self::new();
        for (model, pricing) in parsed {
            table.insert(model, pricing);
        }
        Ok(table)
    }

    /// Exact name first, then without a date suffix, then the longest
    /// registered prefix.
    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        let model = model.to_lowercase();
        if let Some(pricing) = self.models.get(&model) {
            return Some(pricing);
        }
        let normalized = normalize_model_name(&model);
        if let Some(pricing) = self.models.get(&normalized) {
            return Some(pricing);
        }
        self.models
            .iter()
            .filter(|(name, _)| normalized.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, pricing)| pricing)
    }
}

impl PricingFunction for PriceTable {
    fn cost(&self, model: &str, usage: &Usage) -> f64 {
        self.get(model)
            .map(|pricing| {
                let input_cost = (usage.input_tokens as f64 / 1_000_000.0) * pricing.input;
                let output_cost = (usage.output_tokens as f64 / 1_000_000.0) * pricing.output;
                input_cost + output_cost
            })
            .unwrap_or(0.0)
    }
}

fn normalize_model_name(model: &str) -> String {
    let model = model.rsplit('/').next().unwrap_or(model);
    match DATE_SUFFIX_RE.as_ref() {
        Some(re) => re.replace(model, "").into_owned(),
        None => model.to_string(),
    }
}

/// Running usage and spend of a run. Totals never decrease.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CostAccountant {
    total: f64,
    usage: Usage,
    turn_costs: Vec<f64>,
}

impl CostAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price one completion and add it to the totals. Returns the cost
    /// charged for this call.
    pub fn record(&mut self, model: &str, usage: &Usage, pricing: &dyn PricingFunction) -> f64 {
        let raw = pricing.cost(model, usage);
        let cost = if raw.is_finite() && raw > 0.0 { raw } else { 0.0 };
        self.total += cost;
        self.usage += *usage;
        self.turn_costs.push(cost);
        cost
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn turn_costs(&self) -> &[f64] {
        &self.turn_costs
    }

    pub fn exceeds(&self, limit: Option<f64>) -> bool {
        limit.is_some_and(|limit| self.total >= limit)
    }
}
