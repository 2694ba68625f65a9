use crate::content::schema::{ContentSchema, FieldIssue};
use crate::llm::openai::{LlmClient, LlmMessage, TokenUsage};
use crate::llm::pricing::{CostEstimate, PricingError, price_for_model};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound a caller may ask for; keeps one bad request from burning
/// unbounded tokens.
pub const MAX_RETRY_CEILING: u32 = 5;

const SYSTEM_PROMPT: &str = r#"
You are a storefront blog writer. Respond with a single valid JSON object and
nothing else: no prose around it, no markdown fence. Every requested key must
be present and non-empty. Keep the tone practical and specific to the topic.
"#;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid generation request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Pricing(#[from] PricingError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub fields: Map<String, Value>,
    pub usage: TokenUsage,
    pub cost: CostEstimate,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub attempts: u32,
    pub last_error: String,
    pub issues: Vec<FieldIssue>,
    pub usage: TokenUsage,
    pub cost: CostEstimate,
}

#[derive(Debug)]
pub enum GenerationOutcome {
    Complete(GeneratedContent),
    Failed(GenerationFailure),
}

enum Phase {
    Requesting,
    Parsing { raw: String },
    Validating { object: Map<String, Value> },
    Done { object: Map<String, Value> },
    Failed,
}

enum Parsed {
    Object(Map<String, Value>),
    Malformed { reason: String },
}

/// Runs the generate-parse-validate loop for one piece of content.
///
/// `max_retries = N` allows exactly N+1 attempts. Transport failures,
/// unparseable responses and schema misses all consume an attempt; only a
/// response that survives validation completes the job. The model is priced
/// before the first request, so an unlisted model costs nothing.
pub async fn generate_validated(
    llm: &LlmClient,
    topic: &str,
    schema: &ContentSchema,
    model: &str,
    max_retries: u32,
) -> Result<GenerationOutcome, GenerateError> {
    if topic.trim().is_empty() {
        return Err(GenerateError::InvalidRequest("empty topic".to_string()));
    }
    if max_retries > MAX_RETRY_CEILING {
        return Err(GenerateError::InvalidRequest(format!(
            "max_retries {max_retries} above ceiling {MAX_RETRY_CEILING}"
        )));
    }
    let pricing = price_for_model(model)?;

    let messages = build_messages(topic, schema);
    let max_attempts = max_retries + 1;
    let mut attempts = 0u32;
    let mut usage = TokenUsage::default();
    let mut last_error = String::new();
    let mut last_issues: Vec<FieldIssue> = Vec::new();

    let mut phase = Phase::Requesting;
    loop {
        phase = match phase {
            Phase::Requesting => {
                attempts += 1;
                match llm.chat(model, &messages).await {
                    Ok(response) => {
                        usage.accumulate(response.usage);
                        Phase::Parsing { raw: response.text }
                    }
                    Err(err) => {
                        last_error = format!("transport: {err}");
                        last_issues.clear();
                        warn!(
                            target = "blogsmith.content",
                            attempt = attempts,
                            error = %err,
                            "generation request failed"
                        );
                        retry_or_fail(attempts, max_attempts)
                    }
                }
            }
            Phase::Parsing { raw } => match parse_object(&raw) {
                Parsed::Object(object) => Phase::Validating { object },
                Parsed::Malformed { reason } => {
                    last_error = format!("parse: {reason}");
                    last_issues.clear();
                    warn!(
                        target = "blogsmith.content",
                        attempt = attempts,
                        reason = %reason,
                        "response was not a JSON object"
                    );
                    retry_or_fail(attempts, max_attempts)
                }
            },
            Phase::Validating { object } => {
                let issues = schema.validate(&object);
                if issues.is_empty() {
                    Phase::Done { object }
                } else {
                    last_error = format!("validation: {} field issue(s)", issues.len());
                    warn!(
                        target = "blogsmith.content",
                        attempt = attempts,
                        issues = issues.len(),
                        "generated object missed the schema"
                    );
                    last_issues = issues;
                    retry_or_fail(attempts, max_attempts)
                }
            }
            Phase::Done { object } => {
                debug!(
                    target = "blogsmith.content",
                    attempts = attempts,
                    total_tokens = usage.total_tokens,
                    "content accepted"
                );
                return Ok(GenerationOutcome::Complete(GeneratedContent {
                    fields: object,
                    cost: pricing.estimate(&usage),
                    usage,
                    attempts,
                }));
            }
            Phase::Failed => {
                return Ok(GenerationOutcome::Failed(GenerationFailure {
                    attempts,
                    last_error,
                    issues: last_issues,
                    cost: pricing.estimate(&usage),
                    usage,
                }));
            }
        };
    }
}

fn retry_or_fail(attempts: u32, max_attempts: u32) -> Phase {
    if attempts >= max_attempts {
        Phase::Failed
    } else {
        Phase::Requesting
    }
}

fn build_messages(topic: &str, schema: &ContentSchema) -> Vec<LlmMessage> {
    let expectations: Vec<Value> = schema
        .fields()
        .iter()
        .map(|field| json!({ "key": field.key, "expect": field.shape.prompt_hint() }))
        .collect();
    let payload = json!({
        "topic": topic,
        "required_keys": expectations,
        "instruction": "Write the blog post as one JSON object using exactly the required keys.",
    });
    vec![
        LlmMessage::system(SYSTEM_PROMPT),
        LlmMessage::user(payload.to_string()),
    ]
}

fn parse_object(raw: &str) -> Parsed {
    let cleaned = strip_markdown_fence(raw);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(object)) => Parsed::Object(object),
        Ok(other) => Parsed::Malformed {
            reason: format!("expected a JSON object, got {}", json_type_name(&other)),
        },
        Err(err) => Parsed::Malformed {
            reason: err.to_string(),
        },
    }
}

// Models wrap JSON in ``` fences often enough to strip them up front.
fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::openai::LlmConfig;

    fn offline_client() -> LlmClient {
        LlmClient::new(LlmConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            api_key: Some("test-key".to_string()),
            model: "gpt-3.5-turbo-1106".to_string(),
            temperature: 0.0,
        })
    }

    #[test]
    fn parse_accepts_fenced_json_objects() {
        let raw = "```json\n{\"title\": \"Hi\"}\n```";
        match parse_object(raw) {
            Parsed::Object(object) => assert_eq!(object["title"], "Hi"),
            Parsed::Malformed { reason } => panic!("unexpected parse failure: {reason}"),
        }
    }

    #[test]
    fn parse_tags_non_objects_as_malformed() {
        match parse_object("[1, 2, 3]") {
            Parsed::Malformed { reason } => assert!(reason.contains("an array")),
            Parsed::Object(_) => panic!("arrays must not validate"),
        }
        assert!(matches!(
            parse_object("not json at all"),
            Parsed::Malformed { .. }
        ));
    }

    #[test]
    fn fence_stripping_keeps_inner_lines() {
        assert_eq!(strip_markdown_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn prompt_names_every_schema_key() {
        let messages = build_messages("cast iron", &ContentSchema::blog_post());
        assert_eq!(messages.len(), 2);
        for key in ["title", "introduction", "sections", "conclusion", "tags"] {
            assert!(messages[1].content.contains(key));
        }
    }

    #[tokio::test]
    async fn unknown_model_fails_before_any_request() {
        let result = generate_validated(
            &offline_client(),
            "cast iron care",
            &ContentSchema::blog_post(),
            "gpt-nonexistent",
            2,
        )
        .await;
        assert!(matches!(
            result,
            Err(GenerateError::Pricing(PricingError::UnknownModel(_)))
        ));
    }

    #[tokio::test]
    async fn empty_topic_is_rejected_up_front() {
        let result = generate_validated(
            &offline_client(),
            "   ",
            &ContentSchema::blog_post(),
            "gpt-3.5-turbo-1106",
            0,
        )
        .await;
        assert!(matches!(result, Err(GenerateError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn retry_ceiling_is_enforced() {
        let result = generate_validated(
            &offline_client(),
            "cast iron care",
            &ContentSchema::blog_post(),
            "gpt-3.5-turbo-1106",
            MAX_RETRY_CEILING + 1,
        )
        .await;
        assert!(matches!(result, Err(GenerateError::InvalidRequest(_))));
    }
}

#[cfg(test)]
#[path = "generate_wire_test.rs"]
mod wire_tests;
