//! OpenAI Assistants API (v2) client used to label a message.
//!
//! One classification is: resolve an assistant (configured id, or create one), create a thread
//! with the message and run it, poll the run until it settles, then read the assistant's reply.

use crate::config::OpenAiConfig;
use crate::labels::{Label, LabelSet};
use crate::llm::Classifier;
use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ASSISTANT_NAME: &str = "conversation-labeler";

/// Client for the OpenAI Assistants API.
#[derive(Clone)]
pub struct AssistantClient {
    base_url: String,
    api_key: String,
    organization: String,
    assistant_id: Option<String>,
    model: String,
    beta_header: String,
    run_deadline: Duration,
    poll_interval: Duration,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("assistant api error: {0}")]
    Api(String),
    #[error("assistant run {run_id} ended with status {status}")]
    Run { run_id: String, status: String },
    #[error("assistant did not answer within {0:?}")]
    Timeout(Duration),
    #[error("assistant reply malformed: {0}")]
    Malformed(String),
}

impl AssistantClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            organization: config.organization.clone(),
            assistant_id: config.assistant_id().map(str::to_string),
            model: config.model.clone(),
            beta_header: format!("assistants={}", config.assistants_version),
            run_deadline: Duration::from_millis(config.run_deadline_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", &self.beta_header);
        if !self.organization.is_empty() {
            builder = builder.header("OpenAI-Organization", &self.organization);
        }
        builder
    }

    async fn send<T: DeserializeOwned>(
        builder: reqwest::RequestBuilder,
    ) -> Result<T, AssistantError> {
        let res = builder.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AssistantError::Api(format!("{} {}", status, body)));
        }
        Ok(res.json().await?)
    }

    /// POST /assistants — create an assistant instructed to label against `candidates`.
    pub async fn create_assistant(&self, candidates: &[Label]) -> Result<String, AssistantError> {
        let body = CreateAssistantRequest {
            model: &self.model,
            name: ASSISTANT_NAME,
            instructions: label_instructions(candidates),
            response_format: ResponseFormat { typ: "json_object" },
        };
        let created: AssistantObject =
            Self::send(self.request(reqwest::Method::POST, "/assistants").json(&body)).await?;
        log::debug!("created assistant {}", created.id);
        Ok(created.id)
    }

    /// POST /threads/runs — create a thread holding `text` and start a run on it.
    async fn create_thread_and_run(
        &self,
        assistant_id: &str,
        text: &str,
        candidates: &[Label],
    ) -> Result<Run, AssistantError> {
        let body = CreateThreadAndRunRequest {
            assistant_id,
            additional_instructions: label_instructions(candidates),
            thread: ThreadSeed {
                messages: vec![ThreadMessage {
                    role: "user",
                    content: text,
                }],
            },
        };
        Self::send(self.request(reqwest::Method::POST, "/threads/runs").json(&body)).await
    }

    /// GET /threads/{thread_id}/runs/{run_id}
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let path = format!("/threads/{}/runs/{}", thread_id, run_id);
        Self::send(self.request(reqwest::Method::GET, &path)).await
    }

    /// GET /threads/{thread_id}/messages — text of the newest assistant message.
    async fn latest_reply(&self, thread_id: &str) -> Result<String, AssistantError> {
        let path = format!("/threads/{}/messages?order=desc&limit=1", thread_id);
        let list: MessageList = Self::send(self.request(reqwest::Method::GET, &path)).await?;
        list.data
            .into_iter()
            .find(|m| m.role == "assistant")
            .and_then(|m| m.text())
            .ok_or_else(|| AssistantError::Malformed("no assistant text in thread".to_string()))
    }

    /// DELETE /assistants/{assistant_id}
    pub async fn delete_assistant(&self, assistant_id: &str) -> Result<(), AssistantError> {
        let path = format!("/assistants/{}", assistant_id);
        let _: IgnoredAny = Self::send(self.request(reqwest::Method::DELETE, &path)).await?;
        log::debug!("deleted assistant {}", assistant_id);
        Ok(())
    }

    async fn run_classification(
        &self,
        assistant_id: &str,
        text: &str,
        candidates: &[Label],
    ) -> Result<LabelSet, AssistantError> {
        let mut run = self
            .create_thread_and_run(assistant_id, text, candidates)
            .await?;
        loop {
            match run.status.as_str() {
                "completed" => break,
                "queued" | "in_progress" | "cancelling" => {
                    tokio::time::sleep(self.poll_interval).await;
                    run = self.retrieve_run(&run.thread_id, &run.id).await?;
                }
                _ => {
                    return Err(AssistantError::Run {
                        run_id: run.id.clone(),
                        status: run.status.clone(),
                    })
                }
            }
        }
        let reply = self.latest_reply(&run.thread_id).await?;
        parse_labels(&reply, candidates)
    }
}

#[async_trait]
impl Classifier for AssistantClient {
    /// Creating and running the assistant share one deadline. An assistant created here is
    /// deleted afterwards whatever the outcome; a failed delete is only logged.
    async fn classify(&self, text: &str, candidates: &[Label]) -> Result<LabelSet, AssistantError> {
        let deadline = tokio::time::Instant::now() + self.run_deadline;
        let timed_out = |_: tokio::time::error::Elapsed| AssistantError::Timeout(self.run_deadline);

        let (assistant_id, created) = match self.assistant_id {
            Some(ref id) => (id.clone(), false),
            None => {
                let id = tokio::time::timeout_at(deadline, self.create_assistant(candidates))
                    .await
                    .map_err(timed_out)??;
                (id, true)
            }
        };
        let result = tokio::time::timeout_at(
            deadline,
            self.run_classification(&assistant_id, text, candidates),
        )
        .await
        .map_err(timed_out)
        .and_then(|r| r);
        if created {
            if let Err(e) = self.delete_assistant(&assistant_id).await {
                log::warn!("deleting assistant {} failed: {}", assistant_id, e);
            }
        }
        result
    }
}

/// Instructions telling the assistant which labels exist and how to answer.
pub fn label_instructions(candidates: &[Label]) -> String {
    let names: Vec<&str> = candidates.iter().map(Label::as_str).collect();
    format!(
        "Classify the customer's message with the labels that apply, chosen only from: {}. \
         Reply with a JSON object of the form {{\"labels\": [\"label\", ...]}}. \
         Use an empty list when no label applies.",
        names.join(", ")
    )
}

/// Parse the assistant's reply: `{"labels": [...]}` or a bare array, optionally in a code fence.
/// Names outside `candidates` are dropped.
pub fn parse_labels(reply: &str, candidates: &[Label]) -> Result<LabelSet, AssistantError> {
    let json = strip_code_fence(reply);
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| AssistantError::Malformed(format!("{}: {}", e, reply)))?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("labels") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(AssistantError::Malformed(format!(
                    "missing labels array: {}",
                    reply
                )))
            }
        },
        _ => return Err(AssistantError::Malformed(reply.to_string())),
    };
    let names: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
    if names.len() != items.len() {
        return Err(AssistantError::Malformed(format!(
            "labels must be strings: {}",
            reply
        )));
    }
    let (set, rejected) = LabelSet::from_names(names, candidates);
    if !rejected.is_empty() {
        log::warn!("dropping labels outside vocabulary: {}", rejected.join(", "));
    }
    Ok(set)
}

fn strip_code_fence(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Serialize)]
struct CreateAssistantRequest<'a> {
    model: &'a str,
    name: &'a str,
    instructions: String,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    typ: &'static str,
}

#[derive(Debug, Deserialize)]
struct AssistantObject {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateThreadAndRunRequest<'a> {
    assistant_id: &'a str,
    additional_instructions: String,
    thread: ThreadSeed<'a>,
}

#[derive(Debug, Serialize)]
struct ThreadSeed<'a> {
    messages: Vec<ThreadMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ThreadMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    thread_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadReply>,
}

#[derive(Debug, Deserialize)]
struct ThreadReply {
    role: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

impl ThreadReply {
    /// Concatenated text parts, or None when the message has no text.
    fn text(self) -> Option<String> {
        let parts: Vec<String> = self
            .content
            .into_iter()
            .filter(|p| p.typ == "text")
            .filter_map(|p| p.text.map(|t| t.value))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(""))
        }
    }
}
