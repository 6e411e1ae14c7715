//! Annotation seam: attach labels to a conversation on the support platform.

use crate::channels::ChatwootError;
use crate::labels::LabelSet;
use async_trait::async_trait;

/// Writes labels onto a platform conversation.
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Add `labels` to the conversation. A single attempt; no retry.
    async fn add_labels(
        &self,
        account_id: u64,
        conversation_id: u64,
        labels: &LabelSet,
    ) -> Result<(), ChatwootError>;
}
