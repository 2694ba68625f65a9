use once_cell::sync::Lazy;
use std::env;

pub static API_VERSION: Lazy<String> =
    Lazy::new(|| env::var("SHOPIFY_API_VERSION").unwrap_or_else(|_| "2023-10".to_string()));

pub static ARTICLE_PAGE_LIMIT: Lazy<u32> = Lazy::new(|| {
    env::var("SHOPIFY_ARTICLE_PAGE_LIMIT")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .map(clamp_limit)
        .unwrap_or(50)
});

pub static PRODUCT_PAGE_LIMIT: Lazy<u32> = Lazy::new(|| {
    env::var("SHOPIFY_PRODUCT_PAGE_LIMIT")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .map(clamp_limit)
        .unwrap_or(250)
});

// The admin API rejects limits outside 1..=250.
pub fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, 250)
}
