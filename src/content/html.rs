use crate::content::schema::{ContentSchema, FieldShape, section_text};
use serde_json::{Map, Value};

// The title and tags land on dedicated article fields, not in the body.
const TITLE_KEY: &str = "title";

/// Renders validated fields into article body HTML, following the schema's
/// field order. Content text is escaped; markup comes only from here.
pub fn assemble_body_html(schema: &ContentSchema, fields: &Map<String, Value>) -> String {
    let mut blocks: Vec<String> = Vec::new();
    for field in schema.fields() {
        if field.key == TITLE_KEY {
            continue;
        }
        let Some(value) = fields.get(field.key.trim()) else {
            continue;
        };
        match field.shape {
            FieldShape::Text => {
                if let Some(text) = value.as_str() {
                    blocks.push(paragraph(text));
                }
            }
            FieldShape::TextList => {
                if let Some(items) = value.as_array() {
                    for item in items {
                        if let Some(text) = item.as_str() {
                            blocks.push(paragraph(text));
                        }
                    }
                }
            }
            FieldShape::Sections => {
                if let Some(sections) = value.as_array() {
                    for section in sections {
                        let Some(section) = section.as_object() else {
                            continue;
                        };
                        if let Some(heading) = section_text(section, "heading") {
                            blocks.push(format!("<h2>{}</h2>", escape_html(heading)));
                        }
                        if let Some(body) = section_text(section, "body") {
                            blocks.push(paragraph(body));
                        }
                    }
                }
            }
            FieldShape::Tags => {}
        }
    }
    blocks.join("\n")
}

fn paragraph(text: &str) -> String {
    format!("<p>{}</p>", escape_html(text.trim()))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
