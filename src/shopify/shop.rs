use crate::http::build_client;
use crate::shopify::{ACCESS_TOKEN_HEADER, ShopifyError, StoreCredentials, error_for_status};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub myshopify_domain: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Fetches shop metadata. Doubles as the credential check: a bad token comes
/// back as `ShopifyError::Unauthorized`.
pub async fn fetch_shop(creds: &StoreCredentials) -> Result<ShopInfo, ShopifyError> {
    let client = build_client();
    let url = format!("{}/shop.json", creds.admin_root());
    let response = client
        .get(url)
        .header(ACCESS_TOKEN_HEADER, creds.access_token())
        .send()
        .await
        .map_err(|err| ShopifyError::Request(err.to_string()))?;
    let response = error_for_status(response, "shop")?;

    let payload: ShopEnvelope = response.json().await.map_err(|err| {
        ShopifyError::Deserialize {
            context: "shop",
            detail: err.to_string(),
        }
    })?;
    Ok(payload.shop)
}

#[derive(Deserialize)]
struct ShopEnvelope {
    shop: ShopInfo,
}
