use crate::http::build_client;
use crate::shopify::pagination::next_page_cursor;
use crate::shopify::{
    ACCESS_TOKEN_HEADER, ShopifyError, StoreCredentials, config, error_for_status, link_header,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use urlencoding::encode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    #[serde(default)]
    pub blog_id: Option<i64>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Listing parameters for one page. A cursor page replays only the cursor;
/// the admin API rejects filter params alongside `page_info`.
#[derive(Debug, Clone, Default)]
pub struct ArticleListParams {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub created_at_min: Option<DateTime<Utc>>,
    pub created_at_max: Option<DateTime<Utc>>,
    pub ascending: bool,
}

impl ArticleListParams {
    pub fn forward_from(pivot: DateTime<Utc>) -> Self {
        Self {
            created_at_min: Some(pivot),
            ascending: true,
            ..Self::default()
        }
    }

    pub fn backward_from(pivot: DateTime<Utc>) -> Self {
        Self {
            created_at_max: Some(pivot),
            ascending: false,
            ..Self::default()
        }
    }

    pub fn from_cursor(cursor: &str) -> Self {
        Self {
            cursor: Some(cursor.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArticlePage {
    pub articles: Vec<Article>,
    pub next_cursor: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub author: Option<String>,
    pub tags: Option<String>,
    pub body_html: String,
    pub published: Option<bool>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArticlePatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub tags: Option<String>,
    pub body_html: Option<String>,
    pub published: Option<bool>,
}

pub async fn fetch_article_page(
    creds: &StoreCredentials,
    blog_id: i64,
    params: &ArticleListParams,
) -> Result<ArticlePage, ShopifyError> {
    let client = build_client();
    let limit = config::clamp_limit(params.limit.unwrap_or(*config::ARTICLE_PAGE_LIMIT));
    let mut url = format!(
        "{}/blogs/{}/articles.json?limit={}",
        creds.admin_root(),
        blog_id,
        limit
    );
    if let Some(cursor) = &params.cursor {
        url.push_str(&format!("&page_info={}", encode(cursor)));
    } else {
        let order = if params.ascending {
            "created_at asc"
        } else {
            "created_at desc"
        };
        url.push_str(&format!("&order={}", encode(order)));
        if let Some(min) = params.created_at_min {
            url.push_str(&format!("&created_at_min={}", encode(&min.to_rfc3339())));
        }
        if let Some(max) = params.created_at_max {
            url.push_str(&format!("&created_at_max={}", encode(&max.to_rfc3339())));
        }
    }
    let response = client
        .get(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let link = link_header(&response);
    let response = error_for_status(response, "articles")?;

    let payload: ArticlesEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "articles",
            detail: err.to_string(),
        }
    })?;
    Ok(ArticlePage {
        articles: payload.articles,
        next_cursor: next_page_cursor(link.as_deref()),
    })
}

pub async fn fetch_article_count(
    creds: &StoreCredentials,
    blog_id: i64,
) -> Result<u64, ShopifyError> {
    let client = build_client();
    let url = format!(
        "{}/blogs/{}/articles/count.json",
        creds.admin_root(),
        blog_id
    );
    let response = client
        .get(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let response = error_for_status(response, "article count")?;

    let payload: CountEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "article count",
            detail: err.to_string(),
        }
    })?;
    Ok(payload.count)
}

pub async fn create_article(
    creds: &StoreCredentials,
    blog_id: i64,
    draft: &ArticleDraft,
) -> Result<Article, ShopifyError> {
    let client = build_client();
    let url = format!("{}/blogs/{}/articles.json", creds.admin_root(), blog_id);
    let body = serde_json::json!({ "article": draft });
    let response = client
        .post(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .json(&body)
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let response = error_for_status(response, "create article")?;

    let payload: ArticleEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "create article",
            detail: err.to_string(),
        }
    })?;
    Ok(payload.article)
}

pub async fn update_article(
    creds: &StoreCredentials,
    blog_id: i64,
    article_id: i64,
    patch: &ArticlePatch,
) -> Result<Article, ShopifyError> {
    let client = build_client();
    let url = format!(
        "{}/blogs/{}/articles/{}.json",
        creds.admin_root(),
        blog_id,
        article_id
    );
    let body = serde_json::json!({ "article": patch });
    let response = client
        .put(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .json(&body)
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let response = error_for_status(response, "update article")?;

    let payload: ArticleEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "update article",
            detail: err.to_string(),
        }
    })?;
    Ok(payload.article)
}

#[derive(Deserialize)]
struct ArticlesEnvelope {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Deserialize)]
struct ArticleEnvelope {
    article: Article,
}

#[derive(Deserialize)]
struct CountEnvelope {
    count: u64,
}
