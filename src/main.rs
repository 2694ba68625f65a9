mod catalog;
mod content;
mod http;
mod idempotency;
mod jobs;
mod llm;
mod metrics;
mod models;
mod pipeline;
mod security;
mod shopify;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, ArticleRequest, ArticleResponse, ArticleStatus, GenerateRequest, GenerateResponse,
    GenerateStatus,
};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use security::{AuthContext, AuthState, require_api_auth};
use serde_json::json;
use shopify::StoreCredentials;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "blogsmith.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let pipeline = Pipeline::from_env();
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());
    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/connect", post(connect_store))
        .route("/products/count", post(product_count))
        .route("/products/batch", post(product_batch))
        .route("/articles/count", post(article_count))
        .route("/catalog/sync", post(catalog_sync))
        .route("/articles", post(create_article))
        .route("/articles/generate", post(generate_article))
        .nest(
            "/jobs",
            Router::new()
                .route("/articles", post(enqueue_article_job))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "blogsmith.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, ArticleResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "blogsmith-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Pipeline(PipelineError::invalid_input(
                "docs",
                "unauthorized",
            )));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Blogsmith API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Run the topic → published article pipeline.
///
/// - Method: `POST`
/// - Path: `/articles`
/// - Auth: `Authorization: Bearer <key>` or `X-Blogsmith-Key: <key>`
/// - Body: `ArticleRequest`
/// - Response: `ArticleResponse` (per-stage transcript; `422` when generation
///   exhausts its retry budget)
///
/// Honors `Idempotency-Key`: a completed response is replayed verbatim,
/// failure reports included, with the same status code.
async fn create_article(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<ArticleRequest>,
) -> Result<(StatusCode, Json<ArticleResponse>), AppError> {
    crate::metrics::inc_requests("/articles");
    info!(
        target = "blogsmith.api",
        account_id = %context.account_id,
        api_key = %context.api_key_id,
        "article pipeline invoked",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok((article_status_code(existing.status), Json(existing)));
            }
            let response = state.pipeline.run(payload).await?;
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &key, &response, ttl).await;
            return Ok((article_status_code(response.status), Json(response)));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok((article_status_code(existing.status), Json(existing)));
        }
        let response = state.pipeline.run(payload).await?;
        state.idempotency.lock().await.insert(key, response.clone());
        return Ok((article_status_code(response.status), Json(response)));
    }

    let response = state.pipeline.run(payload).await?;

    Ok((article_status_code(response.status), Json(response)))
}

/// An exhausted retry budget is a complete response, not a transport error.
fn article_status_code(status: ArticleStatus) -> StatusCode {
    match status {
        ArticleStatus::GenerationFailed => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::OK,
    }
}

/// Generate and validate content without touching the storefront.
///
/// - Method: `POST`
/// - Path: `/articles/generate`
/// - Body: `GenerateRequest`
/// - Response: `GenerateResponse` (content + cost, or the failure report with `422`)
async fn generate_article(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>), AppError> {
    crate::metrics::inc_requests("/articles/generate");
    info!(
        target = "blogsmith.api",
        account_id = %context.account_id,
        "content generation invoked",
    );
    let response = state.pipeline.generate(&payload).await?;
    let status = match response.status {
        GenerateStatus::Failed => StatusCode::UNPROCESSABLE_ENTITY,
        GenerateStatus::Complete => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Walk(catalog::WalkError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_article_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ArticleRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/articles");
    let id = state
        .queue
        .enqueue_article(payload, context)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "not_found",
        )))
    }
}

/// Error body for a failed catalog walk. Names the page that failed so the
/// caller can retry without guessing where the walk broke.
#[derive(Debug, Serialize)]
struct WalkErrorBody {
    error: &'static str,
    detail: String,
    direction: catalog::Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                let mut response = (status, Json(payload)).into_response();
                if let PipelineErrorKind::RateLimited {
                    retry_after_secs: Some(secs),
                } = err.kind()
                {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                }
                response
            }
            // A bad pivot or rejected token is the caller's mistake. A fetch
            // failure names the failing page so the caller can pick the walk
            // back up.
            AppError::Walk(err) => {
                let detail = err.to_string();
                match err {
                    catalog::WalkError::InvalidPivot { .. } => {
                        let payload = ApiError {
                            error: "catalog_sync".to_string(),
                            detail: Some(detail),
                        };
                        (StatusCode::BAD_REQUEST, Json(payload)).into_response()
                    }
                    catalog::WalkError::Fetch {
                        direction,
                        cursor,
                        source,
                    } => {
                        let status = match &source {
                            shopify::ShopifyError::Unauthorized(_) => StatusCode::BAD_REQUEST,
                            shopify::ShopifyError::RateLimited { .. } => {
                                StatusCode::TOO_MANY_REQUESTS
                            }
                            _ => StatusCode::BAD_GATEWAY,
                        };
                        let payload = WalkErrorBody {
                            error: "catalog_sync",
                            detail,
                            direction,
                            cursor,
                        };
                        let mut response = (status, Json(payload)).into_response();
                        if let shopify::ShopifyError::RateLimited {
                            retry_after_secs: Some(secs),
                        } = source
                        {
                            response
                                .headers_mut()
                                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                        }
                        response
                    }
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
// -------- Storefront endpoints (connect + loaders) --------
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    store_url: String,
    access_token: String,
}

#[derive(Debug, Serialize)]
struct ConnectResponse {
    shop: shopify::ShopInfo,
    blogs: Vec<shopify::BlogSummary>,
}

/// Validates store credentials and lists the blogs they can publish to.
async fn connect_store(
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, AppError> {
    crate::metrics::inc_requests("/connect");
    info!(
        target = "blogsmith.api",
        account_id = %context.account_id,
        "store connect requested",
    );
    let creds = StoreCredentials::new(&payload.store_url, &payload.access_token);
    let shop = shopify::shop::fetch_shop(&creds)
        .await
        .map_err(|err| pipeline::storefront_error("connect", err))?;
    let blogs = shopify::blogs::fetch_blogs(&creds)
        .await
        .map_err(|err| pipeline::storefront_error("connect", err))?;
    Ok(Json(ConnectResponse { shop, blogs }))
}

#[derive(Debug, Deserialize)]
struct StoreQueryRequest {
    store_url: String,
    access_token: String,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: u64,
}

async fn product_count(
    Json(payload): Json<StoreQueryRequest>,
) -> Result<Json<CountResponse>, AppError> {
    crate::metrics::inc_requests("/products/count");
    let creds = StoreCredentials::new(&payload.store_url, &payload.access_token);
    let count = shopify::products::fetch_product_count(&creds)
        .await
        .map_err(|err| pipeline::storefront_error("products", err))?;
    Ok(Json(CountResponse { count }))
}

#[derive(Debug, Serialize)]
struct ProductBatchResponse {
    products: Vec<shopify::ProductSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<String>,
    total: u64,
}

/// One product page per call. The client walks the cursor and divides by
/// `total` for its progress bar.
async fn product_batch(
    Json(payload): Json<StoreQueryRequest>,
) -> Result<Json<ProductBatchResponse>, AppError> {
    crate::metrics::inc_requests("/products/batch");
    let creds = StoreCredentials::new(&payload.store_url, &payload.access_token);
    let total = shopify::products::fetch_product_count(&creds)
        .await
        .map_err(|err| pipeline::storefront_error("products", err))?;
    let page = shopify::products::fetch_product_page(&creds, payload.cursor.as_deref())
        .await
        .map_err(|err| pipeline::storefront_error("products", err))?;
    Ok(Json(ProductBatchResponse {
        products: page.products,
        next_cursor: page.next_cursor,
        total,
    }))
}

#[derive(Debug, Deserialize)]
struct ArticleCountRequest {
    store_url: String,
    access_token: String,
    blog_id: i64,
}

async fn article_count(
    Json(payload): Json<ArticleCountRequest>,
) -> Result<Json<CountResponse>, AppError> {
    crate::metrics::inc_requests("/articles/count");
    let creds = StoreCredentials::new(&payload.store_url, &payload.access_token);
    let count = shopify::articles::fetch_article_count(&creds, payload.blog_id)
        .await
        .map_err(|err| pipeline::storefront_error("articles", err))?;
    Ok(Json(CountResponse { count }))
}

#[derive(Debug, Deserialize)]
struct CatalogSyncRequest {
    store_url: String,
    access_token: String,
    blog_id: i64,
    pivot: String,
    #[serde(default)]
    step_limit: Option<u32>,
    #[serde(default)]
    resume: Option<catalog::ResumeCursors>,
}

#[derive(Debug, Serialize)]
struct CatalogSyncResponse {
    collected: usize,
    exhausted: bool,
    pages_fetched: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    resume: Option<catalog::ResumeCursors>,
    articles: Vec<shopify::Article>,
}

/// Walk a blog's article listing outward from a pivot date.
///
/// - Method: `POST`
/// - Path: `/catalog/sync`
/// - Body: `CatalogSyncRequest` (pass back `resume` to continue a walk)
/// - Response: articles sorted by `created_at`, the pages spent, and resume
///   cursors when the listing is not exhausted
async fn catalog_sync(
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<CatalogSyncRequest>,
) -> Result<Json<CatalogSyncResponse>, AppError> {
    crate::metrics::inc_requests("/catalog/sync");
    info!(
        target = "blogsmith.api",
        account_id = %context.account_id,
        blog_id = payload.blog_id,
        "catalog sync invoked",
    );
    let creds = StoreCredentials::new(&payload.store_url, &payload.access_token);
    let step_limit = payload.step_limit.unwrap_or_else(sync_step_limit_from_env);
    let mut on_page = |report: catalog::WalkProgress| {
        crate::metrics::walk_page(report.direction, report.pages_fetched, report.items_collected)
    };
    let outcome = match payload.resume {
        Some(cursors) => {
            catalog::resume(
                &creds,
                payload.blog_id,
                &payload.pivot,
                cursors,
                step_limit,
                &mut on_page,
            )
            .await
        }
        None => {
            catalog::paginate(
                &creds,
                payload.blog_id,
                &payload.pivot,
                step_limit,
                &mut on_page,
            )
            .await
        }
    }
    .map_err(AppError::Walk)?;

    Ok(Json(CatalogSyncResponse {
        collected: outcome.articles.len(),
        exhausted: outcome.exhausted,
        pages_fetched: outcome.pages_fetched,
        resume: outcome.resume,
        articles: outcome.articles.into_sorted(),
    }))
}

fn sync_step_limit_from_env() -> u32 {
    std::env::var("SYNC_STEP_LIMIT")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(50)
}

#[cfg(test)]
#[path = "main_test.rs"]
mod wire_tests;
