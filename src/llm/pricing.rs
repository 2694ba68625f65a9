use crate::llm::openai::TokenUsage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("model not recognized: {0}")]
    UnknownModel(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub model: &'static str,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

// USD per 1k tokens, published list prices.
const PRICING_TABLE: &[ModelPricing] = &[
    ModelPricing {
        model: "gpt-3.5-turbo-1106",
        input_per_1k: 0.001,
        output_per_1k: 0.002,
    },
    ModelPricing {
        model: "gpt-4-1106-preview",
        input_per_1k: 0.01,
        output_per_1k: 0.03,
    },
    ModelPricing {
        model: "gpt-4",
        input_per_1k: 0.03,
        output_per_1k: 0.06,
    },
    ModelPricing {
        model: "gpt-4o",
        input_per_1k: 0.005,
        output_per_1k: 0.015,
    },
    ModelPricing {
        model: "gpt-4o-mini",
        input_per_1k: 0.00015,
        output_per_1k: 0.0006,
    },
];

pub fn price_for_model(model: &str) -> Result<&'static ModelPricing, PricingError> {
    PRICING_TABLE
        .iter()
        .find(|entry| entry.model == model)
        .ok_or_else(|| PricingError::UnknownModel(model.to_string()))
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

impl ModelPricing {
    pub fn estimate(&self, usage: &TokenUsage) -> CostEstimate {
        let input_cost = f64::from(usage.prompt_tokens) / 1000.0 * self.input_per_1k;
        let output_cost = f64::from(usage.completion_tokens) / 1000.0 * self.output_per_1k;
        CostEstimate {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }
}
