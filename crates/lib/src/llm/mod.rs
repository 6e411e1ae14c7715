//! Label classification against an LLM assistant.
//!
//! [`Classifier`] is the seam the relay depends on; [`AssistantClient`] implements it with the
//! OpenAI Assistants API.

mod assistant;

use crate::labels::{Label, LabelSet};
use async_trait::async_trait;

pub use assistant::{label_instructions, parse_labels, AssistantClient, AssistantError};

/// Assigns labels from `candidates` to a piece of text.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Zero or more labels; every returned label is one of `candidates`.
    async fn classify(&self, text: &str, candidates: &[Label]) -> Result<LabelSet, AssistantError>;
}
