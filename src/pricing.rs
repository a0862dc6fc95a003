//! Static pricing and rate-limit tables plus cost estimation.

use serde::Serialize;

use crate::batch::{Usage, WorkItem};

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

const PRICING: &[(&str, ModelPricing)] = &[
    ("gpt-4o", ModelPricing { input: 2.50, output: 10.00 }),
    ("gpt-4o-mini", ModelPricing { input: 0.15, output: 0.60 }),
    ("gpt-4-turbo", ModelPricing { input: 10.00, output: 30.00 }),
    ("gpt-3.5-turbo", ModelPricing { input: 0.50, output: 1.50 }),
];

// Tier 1 requests-per-minute limits.
const RATE_LIMITS: &[(&str, f64)] = &[
    ("gpt-4o", 500.0),
    ("gpt-4o-mini", 500.0),
    ("gpt-4-turbo", 500.0),
    ("gpt-3.5-turbo", 3500.0),
];

/// Output tokens assumed per request when estimating.
pub const DEFAULT_OUTPUT_TOKENS: u64 = 20;
// Chat message framing added to every request.
const MESSAGE_OVERHEAD_TOKENS: u64 = 10;

pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    PRICING.iter().find(|(name, _)| *name == model).map(|(_, p)| *p)
}

pub fn default_rpm(model: &str) -> Option<f64> {
    RATE_LIMITS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, rpm)| *rpm)
}

/// Rough token count: one token per 3.5 characters.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f64 / 3.5).ceil() as u64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

/// Estimates the cost of classifying `items` before running. `None` for unpriced models.
pub fn estimate_cost(
    model: &str,
    system_prompt: &str,
    items: &[WorkItem],
    output_tokens_per_request: u64,
) -> Option<CostEstimate> {
    let rates = pricing_for(model)?;
    let system_tokens = estimate_tokens(system_prompt);

    let total_input_tokens: u64 = items
        .iter()
        .map(|item| system_tokens + estimate_tokens(&item.input) + MESSAGE_OVERHEAD_TOKENS)
        .sum();
    let total_output_tokens = output_tokens_per_request * items.len() as u64;

    let input_cost = total_input_tokens as f64 / 1_000_000.0 * rates.input;
    let output_cost = total_output_tokens as f64 / 1_000_000.0 * rates.output;

    Some(CostEstimate {
        total_input_tokens,
        total_output_tokens,
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
    })
}

/// Actual cost of one call from its reported usage. `None` for unpriced models.
pub fn cost_from_usage(model: &str, usage: &Usage) -> Option<f64> {
    let rates = pricing_for(model)?;
    let input = usage.prompt_tokens as f64 / 1_000_000.0 * rates.input;
    let output = usage.completion_tokens as f64 / 1_000_000.0 * rates.output;
    Some(input + output)
}
