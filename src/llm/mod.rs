pub mod openai;
pub mod pricing;

pub use openai::{LlmClient, LlmConfig, TokenUsage};
pub use pricing::CostEstimate;
