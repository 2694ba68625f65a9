pub mod format;
pub mod generate;
pub mod html;
pub mod schema;

pub use format::link_first_mention;
pub use generate::{
    GenerateError, GeneratedContent, GenerationFailure, GenerationOutcome, generate_validated,
};
pub use html::assemble_body_html;
pub use schema::{ContentSchema, FieldSpec};
