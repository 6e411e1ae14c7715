//! Chatwoot channel: add labels to a conversation via the application API.

use crate::channels::Annotator;
use crate::config::ChatwootConfig;
use crate::labels::LabelSet;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Client for the Chatwoot application API.
#[derive(Clone)]
pub struct ChatwootClient {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatwootError {
    #[error("chatwoot request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("chatwoot api error: {0}")]
    Api(String),
}

#[derive(Debug, Serialize)]
struct LabelsBody<'a> {
    labels: &'a LabelSet,
}

impl ChatwootClient {
    pub fn new(config: &ChatwootConfig) -> Result<Self, ChatwootError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            client,
        })
    }

    /// POST /api/v1/accounts/{account_id}/conversations/{conversation_id}/labels
    pub async fn add_conversation_labels(
        &self,
        account_id: u64,
        conversation_id: u64,
        labels: &LabelSet,
    ) -> Result<(), ChatwootError> {
        let url = format!(
            "{}/api/v1/accounts/{}/conversations/{}/labels",
            self.base_url, account_id, conversation_id
        );
        let res = self
            .client
            .post(&url)
            .header("api_access_token", &self.access_token)
            .json(&LabelsBody { labels })
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChatwootError::Api(format!(
                "add labels failed: {} {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Annotator for ChatwootClient {
    async fn add_labels(
        &self,
        account_id: u64,
        conversation_id: u64,
        labels: &LabelSet,
    ) -> Result<(), ChatwootError> {
        self.add_conversation_labels(account_id, conversation_id, labels)
            .await
    }
}
