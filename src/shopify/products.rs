use crate::http::build_client;
use crate::shopify::pagination::next_page_cursor;
use crate::shopify::{
    ACCESS_TOKEN_HEADER, ShopifyError, StoreCredentials, config, error_for_status, link_header,
};
use serde::{Deserialize, Serialize};
use urlencoding::encode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: i64,
    pub title: String,
    pub handle: String,
}

impl ProductSummary {
    /// Canonical storefront URL for this product.
    pub fn storefront_url(&self, store_url: &str) -> String {
        storefront_product_url(store_url, &self.handle)
    }
}

/// Builds the public storefront URL for a product handle.
pub fn storefront_product_url(store_url: &str, handle: &str) -> String {
    format!("{}/products/{}", store_url, encode(handle))
}

#[derive(Debug, Clone)]
pub struct ProductPage {
    pub products: Vec<ProductSummary>,
    pub next_cursor: Option<String>,
}

/// Fetches one page of the product listing. Pass the cursor from the previous
/// page to continue; `None` starts from the beginning.
pub async fn fetch_product_page(
    creds: &StoreCredentials,
    cursor: Option<&str>,
) -> Result<ProductPage, ShopifyError> {
    let client = build_client();
    let limit = *config::PRODUCT_PAGE_LIMIT;
    let mut url = format!(
        "{}/products.json?limit={}&fields=id,title,handle",
        creds.admin_root(),
        limit
    );
    if let Some(cursor) = cursor {
        url.push_str(&format!("&page_info={}", encode(cursor)));
    }
    let response = client
        .get(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let link = link_header(&response);
    let response = error_for_status(response, "products")?;

    let payload: ProductsEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "products",
            detail: err.to_string(),
        }
    })?;
    Ok(ProductPage {
        products: payload.products,
        next_cursor: next_page_cursor(link.as_deref()),
    })
}

pub async fn fetch_product_count(creds: &StoreCredentials) -> Result<u64, ShopifyError> {
    let client = build_client();
    let url = format!("{}/products/count.json", creds.admin_root());
    let response = client
        .get(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let response = error_for_status(response, "product count")?;

    let payload: CountEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "product count",
            detail: err.to_string(),
        }
    })?;
    Ok(payload.count)
}

#[derive(Deserialize)]
struct ProductsEnvelope {
    #[serde(default)]
    products: Vec<ProductSummary>,
}

#[derive(Deserialize)]
struct CountEnvelope {
    count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storefront_url_encodes_the_handle() {
        let product = ProductSummary {
            id: 1,
            title: "Blue Widget".to_string(),
            handle: "blue widget".to_string(),
        };
        assert_eq!(
            product.storefront_url("https://demo.myshopify.com"),
            "https://demo.myshopify.com/products/blue%20widget"
        );
    }
}
