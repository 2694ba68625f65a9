//! Storefront client tests against a mock admin API.
//!
//! Query assertions use decoded values: wiremock compares percent-decoded
//! query pairs, so `order=created_at%20asc` on the wire matches
//! `"created_at asc"` here.

use super::*;
use super::articles::{ArticleListParams, ArticlePatch};
use super::blogs::Metafield;
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{
    body_json, body_partial_json, header, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn creds_for(server: &MockServer) -> StoreCredentials {
    StoreCredentials::new(&server.uri(), "shpat_test")
}

fn admin(suffix: &str) -> String {
    format!("/admin/api/2023-10{suffix}")
}

#[tokio::test]
async fn shop_request_carries_the_access_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(admin("/shop.json")))
        .and(header(ACCESS_TOKEN_HEADER, "shpat_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&json!({
            "shop": { "id": 99, "name": "Demo Store", "currency": "USD" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = shop::fetch_shop(&creds_for(&server))
        .await
        .expect("shop fetch");
    assert_eq!(info.id, 99);
    assert_eq!(info.name, "Demo Store");
    assert_eq!(info.currency.as_deref(), Some("USD"));
}

#[tokio::test]
async fn rejected_credentials_surface_as_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(admin("/shop.json")))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = shop::fetch_shop(&creds_for(&server))
        .await
        .expect_err("token was rejected");
    assert!(matches!(err, ShopifyError::Unauthorized(401)));
}

#[tokio::test]
async fn rate_limiting_reports_the_retry_after_hint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(admin("/shop.json")))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(admin("/shop.json")))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let creds = creds_for(&server);
    let with_hint = shop::fetch_shop(&creds).await.expect_err("rate limited");
    assert!(matches!(
        with_hint,
        ShopifyError::RateLimited {
            retry_after_secs: Some(30),
        }
    ));
    assert!(with_hint.to_string().contains("retry after 30s"));

    let without_hint = shop::fetch_shop(&creds).await.expect_err("rate limited");
    assert!(matches!(
        without_hint,
        ShopifyError::RateLimited {
            retry_after_secs: None,
        }
    ));
    assert!(!without_hint.to_string().contains("retry after"));
}

#[tokio::test]
async fn first_article_page_sends_pivot_filters() {
    let server = MockServer::start().await;

    let link = format!(
        r#"<{}{}?limit=50&page_info=NEXT9>; rel="next""#,
        server.uri(),
        admin("/blogs/7/articles.json"),
    );
    Mock::given(method("GET"))
        .and(path(admin("/blogs/7/articles.json")))
        .and(query_param("limit", "50"))
        .and(query_param("order", "created_at asc"))
        .and(query_param("created_at_min", "2024-03-05T00:00:00+00:00"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(&json!({
                    "articles": [
                        { "id": 42, "title": "Hello", "created_at": "2024-03-06T09:30:00Z" },
                    ],
                }))
                .insert_header("Link", link.as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let pivot = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
    let page = articles::fetch_article_page(
        &creds_for(&server),
        7,
        &ArticleListParams::forward_from(pivot),
    )
    .await
    .expect("first page");

    assert_eq!(page.articles.len(), 1);
    assert_eq!(page.articles[0].id, 42);
    assert_eq!(page.next_cursor.as_deref(), Some("NEXT9"));
}

#[tokio::test]
async fn cursor_page_replays_only_the_cursor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(admin("/blogs/7/articles.json")))
        .and(query_param("page_info", "NEXT9"))
        .and(query_param_is_missing("order"))
        .and(query_param_is_missing("created_at_min"))
        .and(query_param_is_missing("created_at_max"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&json!({ "articles": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let page = articles::fetch_article_page(
        &creds_for(&server),
        7,
        &ArticleListParams::from_cursor("NEXT9"),
    )
    .await
    .expect("cursor page");

    assert!(page.articles.is_empty());
    assert!(page.next_cursor.is_none(), "no Link header, no cursor");
}

#[tokio::test]
async fn create_article_posts_the_envelope() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(admin("/blogs/7/articles.json")))
        .and(header(ACCESS_TOKEN_HEADER, "shpat_test"))
        .and(body_partial_json(json!({
            "article": {
                "title": "Hello",
                "body_html": "<p>Hi</p>",
                "published": false,
            },
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(&json!({
            "article": { "id": 501, "title": "Hello", "created_at": "2024-03-05T12:00:00Z" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let draft = ArticleDraft {
        title: "Hello".to_string(),
        author: None,
        tags: None,
        body_html: "<p>Hi</p>".to_string(),
        published: Some(false),
    };
    let created = articles::create_article(&creds_for(&server), 7, &draft)
        .await
        .expect("create");
    assert_eq!(created.id, 501);
}

#[tokio::test]
async fn article_patch_serializes_only_set_fields() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(admin("/blogs/7/articles/501.json")))
        .and(header(ACCESS_TOKEN_HEADER, "shpat_test"))
        .and(body_json(json!({
            "article": { "tags": "cast-iron", "published": true },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&json!({
            "article": {
                "id": 501,
                "title": "Hello",
                "created_at": "2024-03-05T12:00:00Z",
                "tags": "cast-iron",
            },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let patch = ArticlePatch {
        tags: Some("cast-iron".to_string()),
        published: Some(true),
        ..ArticlePatch::default()
    };
    let updated = articles::update_article(&creds_for(&server), 7, 501, &patch)
        .await
        .expect("update");
    assert_eq!(updated.id, 501);
    assert_eq!(updated.tags.as_deref(), Some("cast-iron"));
}

#[tokio::test]
async fn product_page_requests_the_slim_field_set() {
    let server = MockServer::start().await;

    let link = format!(
        r#"<{}{}?limit=250&page_info=P2>; rel="next""#,
        server.uri(),
        admin("/products.json"),
    );
    Mock::given(method("GET"))
        .and(path(admin("/products.json")))
        .and(query_param("limit", "250"))
        .and(query_param("fields", "id,title,handle"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(&json!({
                    "products": [
                        { "id": 11, "title": "Blue Widget", "handle": "blue-widget" },
                    ],
                }))
                .insert_header("Link", link.as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let page = products::fetch_product_page(&creds_for(&server), None)
        .await
        .expect("product page");
    assert_eq!(page.products.len(), 1);
    assert_eq!(page.products[0].handle, "blue-widget");
    assert_eq!(page.next_cursor.as_deref(), Some("P2"));
}

#[tokio::test]
async fn count_envelopes_unwrap() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(admin("/products/count.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(&json!({ "count": 12 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(admin("/blogs/7/articles/count.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(&json!({ "count": 4 })))
        .expect(1)
        .mount(&server)
        .await;

    let creds = creds_for(&server);
    assert_eq!(products::fetch_product_count(&creds).await.expect("count"), 12);
    assert_eq!(
        articles::fetch_article_count(&creds, 7).await.expect("count"),
        4
    );
}

#[tokio::test]
async fn blog_listing_unwraps_the_envelope() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(admin("/blogs.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(&json!({
            "blogs": [{ "id": 7, "title": "News", "handle": "news" }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let blogs = blogs::fetch_blogs(&creds_for(&server)).await.expect("blogs");
    assert_eq!(blogs.len(), 1);
    assert_eq!(blogs[0].id, 7);
    assert_eq!(blogs[0].handle.as_deref(), Some("news"));
}

#[tokio::test]
async fn blog_creation_carries_description_metafields() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(admin("/blogs.json")))
        .and(body_partial_json(json!({
            "blog": {
                "title": "Care Guides",
                "metafields": [{
                    "namespace": "global",
                    "key": "description",
                    "value": "Practical care guides",
                    "type": "single_line_text_field",
                }],
            },
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(&json!({
            "blog": { "id": 31, "title": "Care Guides", "handle": "care-guides" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = blogs::create_blog(
        &creds_for(&server),
        "Care Guides",
        vec![Metafield::description("Practical care guides")],
    )
    .await
    .expect("create");
    assert_eq!(created.id, 31);
    assert_eq!(created.handle.as_deref(), Some("care-guides"));
}

#[tokio::test]
async fn malformed_shop_payload_is_a_deserialize_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(admin("/shop.json")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(&json!({ "shop": { "name": "No Id" } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = shop::fetch_shop(&creds_for(&server))
        .await
        .expect_err("payload missing the id");
    match err {
        ShopifyError::Deserialize { context, .. } => assert_eq!(context, "shop"),
        other => panic!("expected a deserialize error, got {other:?}"),
    }
}
