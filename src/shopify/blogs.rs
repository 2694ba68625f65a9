use crate::http::build_client;
use crate::shopify::{ACCESS_TOKEN_HEADER, ShopifyError, StoreCredentials, error_for_status};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub handle: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct Metafield {
    pub namespace: String,
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: String,
}

impl Metafield {
    /// The blog-description metafield the storefront admin UI reads.
    pub fn description(value: &str) -> Self {
        Self {
            namespace: "global".to_string(),
            key: "description".to_string(),
            value: value.to_string(),
            value_type: "single_line_text_field".to_string(),
        }
    }
}

pub async fn fetch_blogs(creds: &StoreCredentials) -> Result<Vec<BlogSummary>, ShopifyError> {
    let client = build_client();
    let url = format!("{}/blogs.json", creds.admin_root());
    let response = client
        .get(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let response = error_for_status(response, "blogs")?;

    let payload: BlogsEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "blogs",
            detail: err.to_string(),
        }
    })?;
    Ok(payload.blogs)
}

pub async fn create_blog(
    creds: &StoreCredentials,
    title: &str,
    metafields: Vec<Metafield>,
) -> Result<BlogSummary, ShopifyError> {
    let client = build_client();
    let url = format!("{}/blogs.json", creds.admin_root());
    let body = serde_json::json!({
        "blog": {
            "title": title,
            "metafields": metafields,
        }
    });
    let response = client
        .post(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .json(&body)
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let response = error_for_status(response, "create blog")?;

    let payload: BlogEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "create blog",
            detail: err.to_string(),
        }
    })?;
    Ok(payload.blog)
}

#[derive(Deserialize)]
struct BlogsEnvelope {
    #[serde(default)]
    blogs: Vec<BlogSummary>,
}

#[derive(Deserialize)]
struct BlogEnvelope {
    blog: BlogSummary,
}
