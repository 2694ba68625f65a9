//! Generation-loop tests against a mock chat-completions endpoint.
//!
//! The retry bound is the contract under test: `max_retries = N` buys
//! exactly N+1 upstream calls, transport faults included, and an unlisted
//! model never reaches the wire.

use super::*;
use crate::llm::openai::LlmConfig;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gpt-3.5-turbo-1106";

fn client_for(server: &MockServer) -> LlmClient {
    LlmClient::new(LlmConfig {
        api_url: server.uri(),
        api_key: Some("test-key".to_string()),
        model: MODEL.to_string(),
        temperature: 0.0,
    })
}

fn completion_raw(content: &str) -> Value {
    json!({
        "choices": [{ "message": { "content": content } }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 40, "total_tokens": 140 },
    })
}

fn completion(object: &Value) -> Value {
    completion_raw(&object.to_string())
}

fn valid_post() -> Value {
    json!({
        "title": "Caring for Cast Iron",
        "introduction": "Season it well.",
        "sections": [{ "heading": "Cleaning", "body": "No soap." }],
        "conclusion": "Cook on.",
        "tags": ["cast iron", "kitchen"],
    })
}

fn completed(outcome: GenerationOutcome) -> GeneratedContent {
    match outcome {
        GenerationOutcome::Complete(content) => content,
        GenerationOutcome::Failed(report) => panic!("expected completion, got {report:?}"),
    }
}

fn failed(outcome: GenerationOutcome) -> GenerationFailure {
    match outcome {
        GenerationOutcome::Failed(report) => report,
        GenerationOutcome::Complete(content) => panic!("expected failure, got {content:?}"),
    }
}

#[tokio::test]
async fn clean_response_completes_in_one_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(
            json!({ "model": MODEL, "response_format": { "type": "json_object" } }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(&completion(&valid_post())))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = generate_validated(
        &client_for(&server),
        "cast iron care",
        &ContentSchema::blog_post(),
        MODEL,
        2,
    )
    .await
    .expect("listed model and sane request");

    let content = completed(outcome);
    assert_eq!(content.attempts, 1);
    assert_eq!(content.fields["title"], "Caring for Cast Iron");
    assert_eq!(content.usage.prompt_tokens, 100);
    assert_eq!(content.usage.completion_tokens, 40);
    assert!((content.cost.input_cost - 0.0001).abs() < 1e-12);
    assert!((content.cost.output_cost - 0.00008).abs() < 1e-12);
    assert!((content.cost.total_cost - 0.00018).abs() < 1e-12);
}

#[tokio::test]
async fn invalid_content_burns_every_allowed_attempt() {
    let server = MockServer::start().await;

    // Parses fine, never validates: the title is empty.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(&completion(&json!({ "title": "" }))),
        )
        .expect(3)
        .mount(&server)
        .await;

    let outcome = generate_validated(
        &client_for(&server),
        "cast iron care",
        &ContentSchema::blog_post(),
        MODEL,
        2,
    )
    .await
    .expect("request itself is valid");

    let report = failed(outcome);
    assert_eq!(report.attempts, 3, "max_retries 2 means three attempts");
    assert!(report.last_error.starts_with("validation"));
    assert!(!report.issues.is_empty());
    assert_eq!(report.usage.prompt_tokens, 300, "usage sums across attempts");
    assert_eq!(report.usage.completion_tokens, 120);
    assert!((report.cost.total_cost - (0.0003 + 0.00024)).abs() < 1e-12);
}

#[tokio::test]
async fn zero_retries_means_a_single_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&completion_raw("not even json")))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = generate_validated(
        &client_for(&server),
        "cast iron care",
        &ContentSchema::blog_post(),
        MODEL,
        0,
    )
    .await
    .expect("request itself is valid");

    let report = failed(outcome);
    assert_eq!(report.attempts, 1);
    assert!(report.last_error.starts_with("parse"));
}

#[tokio::test]
async fn recovery_on_the_second_attempt_counts_both() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&completion_raw("garbled")))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&completion(&valid_post())))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = generate_validated(
        &client_for(&server),
        "cast iron care",
        &ContentSchema::blog_post(),
        MODEL,
        3,
    )
    .await
    .expect("request itself is valid");

    let content = completed(outcome);
    assert_eq!(content.attempts, 2, "one miss, then success");
    assert_eq!(content.usage.prompt_tokens, 200, "both attempts are billed");
    assert_eq!(content.usage.completion_tokens, 80);
}

#[tokio::test]
async fn transport_failures_count_toward_the_bound() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&completion(&valid_post())))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = generate_validated(
        &client_for(&server),
        "cast iron care",
        &ContentSchema::blog_post(),
        MODEL,
        1,
    )
    .await
    .expect("request itself is valid");

    let content = completed(outcome);
    assert_eq!(content.attempts, 2, "the 500 consumed an attempt");
    assert_eq!(content.usage.prompt_tokens, 100, "failed call reported no usage");
}

#[tokio::test]
async fn unknown_model_never_reaches_the_wire() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&completion(&valid_post())))
        .expect(0)
        .mount(&server)
        .await;

    let result = generate_validated(
        &client_for(&server),
        "cast iron care",
        &ContentSchema::blog_post(),
        "gpt-imaginary",
        3,
    )
    .await;

    match result {
        Err(GenerateError::Pricing(PricingError::UnknownModel(model))) => {
            assert_eq!(model, "gpt-imaginary");
        }
        other => panic!("expected a pricing error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_api_key_burns_attempts_without_requests() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&completion(&valid_post())))
        .expect(0)
        .mount(&server)
        .await;

    let client = LlmClient::new(LlmConfig {
        api_url: server.uri(),
        api_key: None,
        model: MODEL.to_string(),
        temperature: 0.0,
    });
    let outcome = generate_validated(
        &client,
        "cast iron care",
        &ContentSchema::blog_post(),
        MODEL,
        1,
    )
    .await
    .expect("a missing key fails the attempt, not the request");

    let report = failed(outcome);
    assert_eq!(report.attempts, 2);
    assert!(report.last_error.starts_with("transport"));
    assert_eq!(report.usage.total_tokens, 0);
    assert_eq!(report.cost.total_cost, 0.0);
}
