use crate::content::{FieldSpec, GeneratedContent, GenerationFailure};
use crate::llm::{CostEstimate, TokenUsage};
use crate::shopify::ArticleDraft;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArticleRequest {
    pub store_url: String,
    pub access_token: String,
    pub blog_id: i64,
    pub topic: String,
    #[serde(default)]
    pub product: Option<ProductRef>,
    #[serde(default)]
    pub schema_fields: Option<Vec<FieldSpec>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publish: Option<bool>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Product to weave into the article. An explicit `url` wins; otherwise the
/// storefront URL is derived from `handle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRef {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ArticleResponse {
    pub article_id: Option<i64>,
    pub title: Option<String>,
    pub status: ArticleStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<GenerationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<ArticleDraft>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Published,
    Draft,
    Preview,
    GenerationFailed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub topic: String,
    #[serde(default)]
    pub schema_fields: Option<Vec<FieldSpec>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerateResponse {
    pub status: GenerateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<GeneratedContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<GenerationFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerateStatus {
    Complete,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
