use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema has no fields")]
    Empty,
    #[error("schema key is empty")]
    EmptyKey,
    #[error("duplicate schema key: {0}")]
    DuplicateKey(String),
}

/// Expected shape of one generated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldShape {
    /// Non-empty string.
    Text,
    /// Non-empty array of non-empty strings.
    TextList,
    /// Non-empty array of `{ "heading", "body" }` objects.
    Sections,
    /// Array of non-empty strings, or one comma-separated string.
    Tags,
}

impl FieldShape {
    pub fn prompt_hint(self) -> &'static str {
        match self {
            Self::Text => "a non-empty string",
            Self::TextList => "an array of non-empty strings",
            Self::Sections => {
                "an array of objects, each with non-empty \"heading\" and \"body\" strings"
            }
            Self::Tags => "an array of short tag strings",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    pub shape: FieldShape,
}

#[derive(Debug, Clone)]
pub struct ContentSchema {
    fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub key: String,
    pub issue: String,
}

impl ContentSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen: Vec<&str> = Vec::with_capacity(fields.len());
        for field in &fields {
            let key = field.key.trim();
            if key.is_empty() {
                return Err(SchemaError::EmptyKey);
            }
            if seen.contains(&key) {
                return Err(SchemaError::DuplicateKey(key.to_string()));
            }
            seen.push(key);
        }
        Ok(Self { fields })
    }

    /// The default blog-post layout.
    pub fn blog_post() -> Self {
        Self {
            fields: vec![
                FieldSpec {
                    key: "title".to_string(),
                    shape: FieldShape::Text,
                },
                FieldSpec {
                    key: "introduction".to_string(),
                    shape: FieldShape::Text,
                },
                FieldSpec {
                    key: "sections".to_string(),
                    shape: FieldShape::Sections,
                },
                FieldSpec {
                    key: "conclusion".to_string(),
                    shape: FieldShape::Text,
                },
                FieldSpec {
                    key: "tags".to_string(),
                    shape: FieldShape::Tags,
                },
            ],
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Checks a parsed response object. Empty result means the object
    /// satisfies every field.
    pub fn validate(&self, object: &Map<String, Value>) -> Vec<FieldIssue> {
        let mut issues = Vec::new();
        for field in &self.fields {
            match object.get(field.key.trim()) {
                None => issues.push(FieldIssue {
                    key: field.key.clone(),
                    issue: "missing".to_string(),
                }),
                Some(value) => {
                    if let Some(problem) = shape_problem(field.shape, value) {
                        issues.push(FieldIssue {
                            key: field.key.clone(),
                            issue: problem,
                        });
                    }
                }
            }
        }
        issues
    }
}

fn shape_problem(shape: FieldShape, value: &Value) -> Option<String> {
    match shape {
        FieldShape::Text => match value.as_str() {
            Some(text) if !text.trim().is_empty() => None,
            Some(_) => Some("empty text".to_string()),
            None => Some("expected a string".to_string()),
        },
        FieldShape::TextList => match value.as_array() {
            Some(items) if items.is_empty() => Some("empty list".to_string()),
            Some(items) => {
                let all_text = items
                    .iter()
                    .all(|item| item.as_str().is_some_and(|s| !s.trim().is_empty()));
                if all_text {
                    None
                } else {
                    Some("expected a list of non-empty strings".to_string())
                }
            }
            None => Some("expected a list".to_string()),
        },
        FieldShape::Sections => match value.as_array() {
            Some(items) if items.is_empty() => Some("empty list".to_string()),
            Some(items) => {
                let well_formed = items.iter().all(|item| {
                    item.as_object().is_some_and(|section| {
                        section_text(section, "heading").is_some()
                            && section_text(section, "body").is_some()
                    })
                });
                if well_formed {
                    None
                } else {
                    Some("each section needs heading and body text".to_string())
                }
            }
            None => Some("expected a list of sections".to_string()),
        },
        FieldShape::Tags => {
            if normalized_tags(value).is_some() {
                None
            } else {
                Some("expected tag strings".to_string())
            }
        }
    }
}

pub(crate) fn section_text<'a>(section: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    section
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Collapses either accepted tag shape into the storefront's
/// comma-separated form. `None` when the value is not tag-shaped.
pub fn normalized_tags(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) if !items.is_empty() => {
            let mut tags = Vec::with_capacity(items.len());
            for item in items {
                let tag = item.as_str()?.trim();
                if tag.is_empty() {
                    return None;
                }
                tags.push(tag);
            }
            Some(tags.join(", "))
        }
        Value::String(raw) => {
            let tags: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if tags.is_empty() {
                None
            } else {
                Some(tags.join(", "))
            }
        }
        _ => None,
    }
}
