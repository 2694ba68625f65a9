pub mod articles;
pub mod blogs;
pub mod config;
pub mod pagination;
pub mod products;
pub mod shop;

pub use articles::{Article, ArticleDraft};
pub use blogs::BlogSummary;
pub use products::ProductSummary;
pub use shop::ShopInfo;

use reqwest::Response;
use thiserror::Error;

pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

#[derive(Debug, Error)]
pub enum ShopifyError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("credentials rejected: HTTP {0}")]
    Unauthorized(u16),
    #[error("rate limited by the storefront API{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("HTTP {status} from {context}")]
    Status { status: u16, context: &'static str },
    #[error("invalid response from {context}: {detail}")]
    Deserialize {
        context: &'static str,
        detail: String,
    },
}

fn retry_hint(secs: &Option<u64>) -> String {
    match secs {
        Some(secs) => format!(", retry after {secs}s"),
        None => String::new(),
    }
}

/// Per-request storefront credentials. Nothing here is process-global: every
/// call addresses whichever store the caller supplied.
#[derive(Debug, Clone)]
pub struct StoreCredentials {
    store_url: String,
    access_token: String,
}

impl StoreCredentials {
    pub fn new(store_url: &str, access_token: &str) -> Self {
        Self {
            store_url: normalize_store_url(store_url),
            access_token: access_token.to_string(),
        }
    }

    pub fn store_url(&self) -> &str {
        &self.store_url
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn admin_root(&self) -> String {
        format!("{}/admin/api/{}", self.store_url, *config::API_VERSION)
    }
}

// Callers paste their shop domain in whatever shape; the admin API wants a
// scheme and no trailing slash.
pub fn normalize_store_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

pub(crate) fn error_for_status(
    response: Response,
    context: &'static str,
) -> Result<Response, ShopifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        401 | 403 => Err(ShopifyError::Unauthorized(status.as_u16())),
        429 => {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            Err(ShopifyError::RateLimited { retry_after_secs })
        }
        code => Err(ShopifyError::Status {
            status: code,
            context,
        }),
    }
}

pub(crate) fn link_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get("link")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}


#[cfg(test)]
#[path = "client_wire_test.rs"]
mod wire_tests;
