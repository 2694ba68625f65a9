use crate::content::generate::MAX_RETRY_CEILING;
use crate::content::schema::normalized_tags;
use crate::content::{
    ContentSchema, FieldSpec, GenerateError, GeneratedContent, GenerationOutcome,
    assemble_body_html, generate_validated, link_first_mention,
};
use crate::llm::{LlmClient, LlmConfig};
use crate::models::{
    ArticleRequest, ArticleResponse, ArticleStatus, GenerateRequest, GenerateResponse,
    GenerateStatus, StageReport,
};
use crate::shopify::products::storefront_product_url;
use crate::shopify::{self, Article, ArticleDraft, ShopifyError, StoreCredentials};
use serde::Serialize;
use serde_json::{Value, json};
use std::{env, future::Future, sync::Arc, time::Instant};
use thiserror::Error;

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    pub llm: Arc<LlmClient>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let llm_config = LlmConfig::from_env();
        let llm = LlmClient::new(llm_config);
        Self {
            config: Arc::new(config),
            llm: Arc::new(llm),
        }
    }

    pub fn from_env() -> Self {
        Self::new(PipelineConfig::from_env())
    }

    /// Generation without publication, for callers that only want the content.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, PipelineError> {
        let schema = resolve_schema(request.schema_fields.as_deref())?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.llm.default_model().to_string());
        let max_retries = request.max_retries.unwrap_or(self.config.default_max_retries);
        let outcome = generate_validated(&self.llm, &request.topic, &schema, &model, max_retries)
            .await
            .map_err(|err| generate_error("generate_content", err))?;
        Ok(match outcome {
            GenerationOutcome::Complete(content) => GenerateResponse {
                status: GenerateStatus::Complete,
                content: Some(content),
                failure: None,
            },
            GenerationOutcome::Failed(report) => GenerateResponse {
                status: GenerateStatus::Failed,
                content: None,
                failure: Some(report),
            },
        })
    }

    pub async fn run(&self, request: ArticleRequest) -> Result<ArticleResponse, PipelineError> {
        let request = Arc::new(request);
        let mut stages = Vec::new();

        if request.blog_id <= 0 {
            return Err(PipelineError::invalid_input(
                "publish_article",
                "blog_id must be positive",
            ));
        }

        let creds = StoreCredentials::new(&request.store_url, &request.access_token);
        let schema = resolve_schema(request.schema_fields.as_deref())?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.llm.default_model().to_string());
        let max_retries = request.max_retries.unwrap_or(self.config.default_max_retries);

        let product = self
            .capture_stage("resolve_product", &mut stages, {
                let req = request.clone();
                let store_url = creds.store_url().to_string();
                async move { stages::resolve_product(&req, &store_url).await }
            })
            .await?;

        let llm = self.llm.clone();
        let outcome = self
            .capture_stage("generate_content", &mut stages, {
                let req = request.clone();
                let schema = schema.clone();
                let model = model.clone();
                async move {
                    stages::generate_content(&req, &schema, &llm, &model, max_retries).await
                }
            })
            .await?;

        let content = match outcome {
            GenerationOutcome::Complete(content) => content,
            GenerationOutcome::Failed(report) => {
                return Ok(ArticleResponse {
                    article_id: None,
                    title: None,
                    status: ArticleStatus::GenerationFailed,
                    attempts: report.attempts,
                    usage: Some(report.usage),
                    cost: Some(report.cost),
                    failure: Some(report),
                    preview: None,
                    stages,
                });
            }
        };

        let body = self
            .capture_stage("assemble_html", &mut stages, {
                let schema = schema.clone();
                let content = content.clone();
                async move { stages::assemble_html(&schema, &content).await }
            })
            .await?;

        let body = self
            .capture_stage("link_product", &mut stages, {
                let product = product.clone();
                async move { stages::link_product(&body, product.as_ref()).await }
            })
            .await?;

        let draft = compose_draft(&self.config, &request, &content, body);

        if request.dry_run {
            return Ok(ArticleResponse {
                article_id: None,
                title: Some(draft.title.clone()),
                status: ArticleStatus::Preview,
                attempts: content.attempts,
                usage: Some(content.usage),
                cost: Some(content.cost),
                failure: None,
                preview: Some(draft),
                stages,
            });
        }

        let article = self
            .capture_stage("publish_article", &mut stages, {
                let creds = creds.clone();
                let draft = draft.clone();
                let blog_id = request.blog_id;
                async move { stages::publish_article(&creds, blog_id, &draft).await }
            })
            .await?;

        let status = if draft.published.unwrap_or(false) {
            ArticleStatus::Published
        } else {
            ArticleStatus::Draft
        };

        Ok(ArticleResponse {
            article_id: Some(article.id),
            title: Some(article.title),
            status,
            attempts: content.attempts,
            usage: Some(content.usage),
            cost: Some(content.cost),
            failure: None,
            preview: None,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        // Lightweight metrics: stage elapsed (trace-based)
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Clone)]
pub struct PipelineConfig {
    pub default_author: String,
    pub publish_live: bool,
    pub default_max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_author: "Blogsmith".to_string(),
            publish_live: false,
            default_max_retries: 2,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let default_author = env::var("BLOGSMITH_DEFAULT_AUTHOR")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.default_author);
        let publish_live = parse_env_bool("BLOGSMITH_PUBLISH_LIVE");
        let default_max_retries = env::var("BLOGSMITH_MAX_RETRIES")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value <= MAX_RETRY_CEILING)
            .unwrap_or(defaults.default_max_retries);
        Self {
            default_author,
            publish_live,
            default_max_retries,
        }
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Upstream,
    RateLimited { retry_after_secs: Option<u64> },
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Upstream,
        }
    }

    pub fn rate_limited(
        stage: &'static str,
        message: impl Into<String>,
        retry_after_secs: Option<u64>,
    ) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::RateLimited { retry_after_secs },
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CostEstimate, TokenUsage};
    use crate::models::ProductRef;

    fn sample_request() -> ArticleRequest {
        ArticleRequest {
            store_url: "https://demo.myshopify.com".to_string(),
            access_token: "shpat_test".to_string(),
            blog_id: 7,
            topic: "Caring for waxed canvas".to_string(),
            product: Some(ProductRef {
                name: "Field Tote".to_string(),
                url: None,
                handle: Some("field-tote".to_string()),
            }),
            schema_fields: None,
            model: None,
            max_retries: None,
            author: None,
            publish: None,
            dry_run: false,
        }
    }

    fn offline_pipeline(max_retries: u32) -> Pipeline {
        let config = PipelineConfig {
            default_max_retries: max_retries,
            ..PipelineConfig::default()
        };
        let llm = LlmClient::new(LlmConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            api_key: Some("test-key".to_string()),
            model: "gpt-3.5-turbo-1106".to_string(),
            temperature: 0.0,
        });
        Pipeline {
            config: Arc::new(config),
            llm: Arc::new(llm),
        }
    }

    fn sample_content(fields: Value) -> GeneratedContent {
        GeneratedContent {
            fields: fields.as_object().cloned().unwrap_or_default(),
            usage: TokenUsage::default(),
            cost: CostEstimate::default(),
            attempts: 1,
        }
    }

    #[tokio::test]
    async fn stage_resolve_product_prefers_explicit_url() {
        let mut req = sample_request();
        req.product = Some(ProductRef {
            name: "Field Tote".to_string(),
            url: Some("https://shop.example/field-tote".to_string()),
            handle: Some("ignored-handle".to_string()),
        });
        let out = stages::resolve_product(&req, "https://demo.myshopify.com")
            .await
            .expect("resolve_product");
        let resolved = out.value.expect("product");
        assert_eq!(
            resolved.url.as_deref(),
            Some("https://shop.example/field-tote")
        );
    }

    #[tokio::test]
    async fn stage_resolve_product_builds_url_from_handle() {
        let req = sample_request();
        let out = stages::resolve_product(&req, "https://demo.myshopify.com")
            .await
            .expect("resolve_product");
        let resolved = out.value.expect("product");
        assert_eq!(
            resolved.url.as_deref(),
            Some("https://demo.myshopify.com/products/field-tote")
        );
    }

    #[tokio::test]
    async fn stage_resolve_product_without_reference() {
        let mut req = sample_request();
        req.product = None;
        let out = stages::resolve_product(&req, "https://demo.myshopify.com")
            .await
            .expect("resolve_product");
        assert!(out.value.is_none());
        assert_eq!(out.output["provided"], json!(false));
    }

    #[tokio::test]
    async fn stage_resolve_product_rejects_blank_name() {
        let mut req = sample_request();
        req.product = Some(ProductRef {
            name: "  ".to_string(),
            url: None,
            handle: None,
        });
        let err = stages::resolve_product(&req, "https://demo.myshopify.com")
            .await
            .expect_err("should reject");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert_eq!(err.stage(), "resolve_product");
    }

    #[tokio::test]
    async fn stage_link_product_wraps_first_mention() {
        let product = ResolvedProduct {
            name: "Field Tote".to_string(),
            url: Some("https://demo.myshopify.com/products/field-tote".to_string()),
        };
        let out = stages::link_product("<p>The Field Tote carries plenty.</p>", Some(&product))
            .await
            .expect("link_product");
        assert!(
            out.value
                .contains("<a href=\"https://demo.myshopify.com/products/field-tote\">Field Tote</a>")
        );
        assert_eq!(out.output["linked"], json!(true));
    }

    #[tokio::test]
    async fn stage_link_product_leaves_unmentioned_body_alone() {
        let product = ResolvedProduct {
            name: "Field Tote".to_string(),
            url: Some("https://demo.myshopify.com/products/field-tote".to_string()),
        };
        let out = stages::link_product("<p>Nothing relevant here.</p>", Some(&product))
            .await
            .expect("link_product");
        assert_eq!(out.value, "<p>Nothing relevant here.</p>");
        assert_eq!(out.output["linked"], json!(false));
    }

    #[tokio::test]
    async fn stage_assemble_html_renders_schema_order() {
        let schema = ContentSchema::blog_post();
        let content = sample_content(json!({
            "title": "Waxed Canvas Care",
            "introduction": "Wax ages well.",
            "sections": [{ "heading": "Cleaning", "body": "Brush it." }],
            "conclusion": "Re-wax yearly.",
            "tags": ["care"],
        }));
        let out = stages::assemble_html(&schema, &content)
            .await
            .expect("assemble_html");
        assert!(out.value.starts_with("<p>Wax ages well.</p>"));
        assert!(out.value.contains("<h2>Cleaning</h2>"));
        assert_eq!(out.output["sections"], json!(1));
    }

    #[tokio::test]
    async fn run_reports_generation_failure_with_stage_transcript() {
        let pipeline = offline_pipeline(1);
        let resp = pipeline.run(sample_request()).await.expect("pipeline run");
        assert_eq!(resp.status, ArticleStatus::GenerationFailed);
        assert_eq!(resp.attempts, 2);
        assert!(resp.article_id.is_none());
        let failure = resp.failure.expect("failure report");
        assert_eq!(failure.attempts, 2);
        let names: Vec<String> = resp.stages.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["resolve_product", "generate_content"]);
    }

    #[tokio::test]
    async fn run_rejects_non_positive_blog_id() {
        let pipeline = offline_pipeline(0);
        let mut req = sample_request();
        req.blog_id = 0;
        let err = pipeline.run(req).await.expect_err("should reject");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn generate_rejects_unknown_model_before_any_attempt() {
        let pipeline = offline_pipeline(0);
        let request = GenerateRequest {
            topic: "Anything".to_string(),
            schema_fields: None,
            model: Some("gpt-imaginary".to_string()),
            max_retries: None,
        };
        let err = pipeline
            .generate(&request)
            .await
            .expect_err("unknown model");
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert!(err.detail().contains("gpt-imaginary"));
    }

    #[test]
    fn compose_draft_falls_back_to_topic_title() {
        let config = PipelineConfig::default();
        let request = sample_request();
        let content = sample_content(json!({ "introduction": "hello" }));
        let draft = compose_draft(&config, &request, &content, "<p>hello</p>".to_string());
        assert_eq!(draft.title, "Caring for waxed canvas");
        assert_eq!(draft.author.as_deref(), Some("Blogsmith"));
        assert_eq!(draft.published, Some(false));
        assert!(draft.tags.is_none());
    }

    #[test]
    fn compose_draft_reads_title_tags_and_publish_flag() {
        let config = PipelineConfig::default();
        let mut request = sample_request();
        request.publish = Some(true);
        request.author = Some("Jo Writer".to_string());
        let content = sample_content(json!({
            "title": "  A Guide to Waxed Canvas  ",
            "tags": ["care", "canvas"],
        }));
        let draft = compose_draft(&config, &request, &content, "<p>body</p>".to_string());
        assert_eq!(draft.title, "A Guide to Waxed Canvas");
        assert_eq!(draft.tags.as_deref(), Some("care, canvas"));
        assert_eq!(draft.author.as_deref(), Some("Jo Writer"));
        assert_eq!(draft.published, Some(true));
    }

    #[test]
    fn storefront_throttle_keeps_its_retry_hint() {
        let err = storefront_error(
            "products",
            ShopifyError::RateLimited {
                retry_after_secs: Some(30),
            },
        );
        assert_eq!(
            err.kind(),
            PipelineErrorKind::RateLimited {
                retry_after_secs: Some(30)
            }
        );
        assert!(err.detail().contains("retry after 30s"));
    }

    #[test]
    fn storefront_rejection_is_the_callers_fault() {
        let err = storefront_error("connect", ShopifyError::Unauthorized(403));
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
        assert!(err.detail().contains("403"));
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProduct {
    pub name: String,
    pub url: Option<String>,
}

/// Folds the generated fields and runtime defaults into an article draft.
/// The title and tags land on dedicated article fields, not in the body.
fn compose_draft(
    config: &PipelineConfig,
    request: &ArticleRequest,
    content: &GeneratedContent,
    body_html: String,
) -> ArticleDraft {
    let title = content
        .fields
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| request.topic.trim().to_string());
    let tags = content.fields.get("tags").and_then(normalized_tags);
    let author = request
        .author
        .as_deref()
        .map(str::trim)
        .filter(|author| !author.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| config.default_author.clone());
    let published = request.publish.unwrap_or(config.publish_live);

    ArticleDraft {
        title,
        author: Some(author),
        tags,
        body_html,
        published: Some(published),
    }
}

pub mod stages {
    use super::*;

    pub async fn resolve_product(
        request: &ArticleRequest,
        store_url: &str,
    ) -> Result<StageOutcome<Option<ResolvedProduct>>, PipelineError> {
        let Some(reference) = &request.product else {
            return Ok(StageOutcome::new(None, json!({ "provided": false })));
        };

        let name = reference.name.trim();
        if name.is_empty() {
            return Err(PipelineError::invalid_input(
                "resolve_product",
                "product name is empty",
            ));
        }

        let url = match (&reference.url, &reference.handle) {
            (Some(url), _) if !url.trim().is_empty() => Some(url.trim().to_string()),
            (_, Some(handle)) if !handle.trim().is_empty() => {
                Some(storefront_product_url(store_url, handle.trim()))
            }
            _ => None,
        };

        let resolved = ResolvedProduct {
            name: name.to_string(),
            url,
        };
        let output = json!({
            "provided": true,
            "name": resolved.name,
            "url": resolved.url,
        });
        Ok(StageOutcome::new(Some(resolved), output))
    }

    pub async fn generate_content(
        request: &ArticleRequest,
        schema: &ContentSchema,
        llm: &LlmClient,
        model: &str,
        max_retries: u32,
    ) -> Result<StageOutcome<GenerationOutcome>, PipelineError> {
        let outcome = generate_validated(llm, &request.topic, schema, model, max_retries)
            .await
            .map_err(|err| generate_error("generate_content", err))?;

        match &outcome {
            GenerationOutcome::Complete(content) => {
                crate::metrics::generation_spend(model, content.attempts, content.usage.total_tokens)
            }
            GenerationOutcome::Failed(report) => {
                crate::metrics::generation_spend(model, report.attempts, report.usage.total_tokens)
            }
        }

        let output = match &outcome {
            GenerationOutcome::Complete(content) => json!({
                "model": model,
                "attempts": content.attempts,
                "total_tokens": content.usage.total_tokens,
                "cost_usd": content.cost.total_cost,
            }),
            GenerationOutcome::Failed(report) => json!({
                "model": model,
                "attempts": report.attempts,
                "last_error": report.last_error,
                "unresolved_issues": report.issues.len(),
            }),
        };
        Ok(StageOutcome::new(outcome, output))
    }

    pub async fn assemble_html(
        schema: &ContentSchema,
        content: &GeneratedContent,
    ) -> Result<StageOutcome<String>, PipelineError> {
        let body = assemble_body_html(schema, &content.fields);
        if body.trim().is_empty() {
            return Err(PipelineError::invalid_input(
                "assemble_html",
                "schema produced an empty body",
            ));
        }
        let sections = body.matches("<h2>").count();
        let output = json!({
            "bytes": body.len(),
            "sections": sections,
        });
        Ok(StageOutcome::new(body, output))
    }

    pub async fn link_product(
        body_html: &str,
        product: Option<&ResolvedProduct>,
    ) -> Result<StageOutcome<String>, PipelineError> {
        let (rendered, output) = match product {
            Some(product) => match &product.url {
                Some(url) => {
                    let mentioned = body_html.contains(product.name.as_str());
                    let rendered = link_first_mention(body_html, &product.name, url);
                    let output = json!({
                        "linked": mentioned,
                        "product": product.name,
                    });
                    (rendered, output)
                }
                None => (
                    body_html.to_string(),
                    json!({ "linked": false, "reason": "no_url" }),
                ),
            },
            None => (
                body_html.to_string(),
                json!({ "linked": false, "reason": "no_product" }),
            ),
        };
        Ok(StageOutcome::new(rendered, output))
    }

    pub async fn publish_article(
        creds: &StoreCredentials,
        blog_id: i64,
        draft: &ArticleDraft,
    ) -> Result<StageOutcome<Article>, PipelineError> {
        let article = shopify::articles::create_article(creds, blog_id, draft)
            .await
            .map_err(|err| storefront_error("publish_article", err))?;
        let output = json!({
            "article_id": article.id,
            "handle": article.handle,
            "published": draft.published,
        });
        Ok(StageOutcome::new(article, output))
    }
}

/// Bad store credentials are the caller's problem, and a throttled call
/// keeps its 429 shape so the client can back off. Everything else from
/// the storefront is an upstream fault.
pub(crate) fn storefront_error(stage: &'static str, err: ShopifyError) -> PipelineError {
    match &err {
        ShopifyError::Unauthorized(_) => PipelineError::invalid_input(stage, err.to_string()),
        ShopifyError::RateLimited { retry_after_secs } => {
            PipelineError::rate_limited(stage, err.to_string(), *retry_after_secs)
        }
        _ => PipelineError::upstream(stage, err.to_string()),
    }
}

fn resolve_schema(fields: Option<&[FieldSpec]>) -> Result<ContentSchema, PipelineError> {
    match fields {
        Some(fields) => ContentSchema::new(fields.to_vec())
            .map_err(|err| PipelineError::invalid_input("generate_content", err.to_string())),
        None => Ok(ContentSchema::blog_post()),
    }
}

fn generate_error(stage: &'static str, err: GenerateError) -> PipelineError {
    match err {
        GenerateError::InvalidRequest(message) => PipelineError::invalid_input(stage, message),
        GenerateError::Pricing(err) => PipelineError::invalid_input(stage, err.to_string()),
    }
}

fn parse_env_bool(key: &str) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
