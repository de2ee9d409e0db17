//! Turning fetched HTML into JSON objects.
//!
//! - [`css`]: deterministic extraction from a base selector plus field selectors
//! - [`llm`]: schema-guided extraction by a language model over page chunks
//! - [`chunking`]: splitting long pages into overlapping token-bounded chunks

pub mod chunking;
pub mod css;
pub mod llm;

pub use css::{CssExtractionStrategy, CssSchema, FieldKind, FieldSpec, scope_html};
pub use llm::{InputFormat, LlmExtractionStrategy, LlmSettings};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("invalid CSS selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("field `{field}` extracts an attribute but names none")]
    MissingAttribute { field: String },
    #[error("every one of {chunks} LLM chunk(s) failed")]
    AllChunksFailed { chunks: usize },
}
