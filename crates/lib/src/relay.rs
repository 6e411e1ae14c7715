//! Webhook pipeline: gate → validate → classify → annotate.
//!
//! Each stage returns `Result<_, RelayError>`; the first failure short-circuits and its message
//! becomes the response text. Dependency failures are logged here, where they occur.

use crate::channels::{Annotator, ChatwootClient, ChatwootError};
use crate::config::{Config, ErrorStatusMode};
use crate::events::{ConversationCreatedEvent, Event};
use crate::labels::{Label, LabelSet};
use crate::llm::{AssistantClient, AssistantError, Classifier};
use anyhow::{Context, Result};
use axum::extract::rejection::BytesRejection;
use axum::http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Response text for a successful run.
pub const SUCCESS_MESSAGE: &str = "Label has been added";

/// Why the token check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// Token passed more than once or in array form.
    #[error("Authorization failed")]
    Malformed,
    /// Token missing or not equal to the configured secret.
    #[error("Invalid auth key")]
    Mismatch,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid request method")]
    Method,
    #[error("{0}")]
    Auth(AuthFailure),
    #[error("Could not validate a request")]
    Schema(#[source] serde_json::Error),
    /// Body could not be read (e.g. over the size limit).
    #[error("Could not validate a request")]
    Body(#[source] BytesRejection),
    #[error("Invalid event")]
    EventIgnored(Event),
    #[error("Conversation messages are empty")]
    EmptyConversation,
    #[error("Message content is empty")]
    EmptyContent,
    #[error("Failed to get label from message")]
    Classification(#[source] AssistantError),
    #[error("Failed to add label")]
    Annotation(#[source] ChatwootError),
}

impl RelayError {
    /// HTTP status for this failure under `mode`.
    pub fn status(&self, mode: ErrorStatusMode) -> StatusCode {
        if mode == ErrorStatusMode::Uniform {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        match self {
            RelayError::Method => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::Auth(_) => StatusCode::UNAUTHORIZED,
            RelayError::Schema(_) => StatusCode::BAD_REQUEST,
            RelayError::Body(rejection) => rejection.status(),
            RelayError::EventIgnored(_)
            | RelayError::EmptyConversation
            | RelayError::EmptyContent => StatusCode::UNPROCESSABLE_ENTITY,
            RelayError::Classification(_) | RelayError::Annotation(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// The parts of an inbound HTTP request the pipeline inspects.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a Method,
    pub headers: &'a HeaderMap,
    /// Decoded query pairs, in order, duplicates kept.
    pub query: &'a [(String, String)],
    pub body: &'a [u8],
}

/// A validated conversation ready for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifiable {
    pub conversation_id: u64,
    pub account_id: u64,
    pub content: String,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotated {
    pub conversation_id: u64,
    pub account_id: u64,
    pub labels: LabelSet,
}

/// Rejects anything but a plain (non-AJAX) POST.
pub fn check_method(method: &Method, headers: &HeaderMap) -> Result<(), RelayError> {
    let ajax = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("XMLHttpRequest"))
        .unwrap_or(false);
    if *method != Method::POST || ajax {
        return Err(RelayError::Method);
    }
    Ok(())
}

/// Compares the `token` query parameter to `expected`. Absent counts as empty.
pub fn check_token(query: &[(String, String)], expected: &str) -> Result<(), RelayError> {
    let mut tokens = query
        .iter()
        .filter(|(k, _)| k == "token" || k.starts_with("token["));
    let provided = match (tokens.next(), tokens.next()) {
        (None, _) => "",
        (Some((k, v)), None) if k == "token" => v.as_str(),
        _ => return Err(RelayError::Auth(AuthFailure::Malformed)),
    };
    if provided != expected {
        return Err(RelayError::Auth(AuthFailure::Mismatch));
    }
    Ok(())
}

/// Parses and validates a `conversation_created` body down to the first message.
pub fn validate_event(body: &[u8]) -> Result<Classifiable, RelayError> {
    let event = ConversationCreatedEvent::from_slice(body).map_err(RelayError::Schema)?;
    if event.event != Event::ConversationCreated {
        log::debug!("ignoring {} event for conversation {}", event.event.name(), event.id);
        return Err(RelayError::EventIgnored(event.event));
    }
    let first = event.first_message().ok_or(RelayError::EmptyConversation)?;
    if first.content.is_empty() {
        return Err(RelayError::EmptyContent);
    }
    Ok(Classifiable {
        conversation_id: event.id,
        account_id: first.account_id,
        content: first.content.clone(),
    })
}

/// Shared pipeline: immutable config plus the two outbound collaborators.
pub struct Relay {
    config: Arc<Config>,
    classifier: Arc<dyn Classifier>,
    annotator: Arc<dyn Annotator>,
    labels: Vec<Label>,
    /// Held across each dump write so the file always holds one whole body, the latest to get the lock.
    dump_lock: Mutex<()>,
}

impl Relay {
    pub fn new(
        config: Arc<Config>,
        classifier: Arc<dyn Classifier>,
        annotator: Arc<dyn Annotator>,
    ) -> Self {
        Self {
            config,
            classifier,
            annotator,
            labels: Label::ALL.to_vec(),
            dump_lock: Mutex::new(()),
        }
    }

    /// Build the relay with the OpenAI and Chatwoot clients described by `config`.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let classifier =
            AssistantClient::new(&config.openai).context("building openai assistant client")?;
        let annotator = ChatwootClient::new(&config.chatwoot).context("building chatwoot client")?;
        Ok(Self::new(config, Arc::new(classifier), Arc::new(annotator)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Candidate labels offered to the classifier.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Method and token checks; everything else needs the body.
    pub fn check_gate(
        &self,
        method: &Method,
        headers: &HeaderMap,
        query: &[(String, String)],
    ) -> Result<(), RelayError> {
        check_method(method, headers)?;
        check_token(query, &self.config.gateway.auth_token)
    }

    /// Run the whole pipeline for one request.
    pub async fn handle(&self, req: InboundRequest<'_>) -> Result<Annotated, RelayError> {
        self.check_gate(req.method, req.headers, req.query)?;
        self.record_body(req.body).await;
        let target = validate_event(req.body)?;
        let labels = self.classify(&target).await?;
        self.annotate(&target, &labels).await?;
        Ok(Annotated {
            conversation_id: target.conversation_id,
            account_id: target.account_id,
            labels,
        })
    }

    async fn classify(&self, target: &Classifiable) -> Result<LabelSet, RelayError> {
        match self.classifier.classify(&target.content, &self.labels).await {
            Ok(labels) => {
                log::debug!(
                    "conversation {} classified as [{}]",
                    target.conversation_id,
                    labels
                );
                Ok(labels)
            }
            Err(e) => {
                log::error!(
                    "classification failed for conversation {}: {}",
                    target.conversation_id,
                    e
                );
                Err(RelayError::Classification(e))
            }
        }
    }

    /// Log the raw body and, when a dump path is configured, overwrite the file with it.
    /// Write failures are logged and do not fail the request.
    async fn record_body(&self, body: &[u8]) {
        log::debug!("webhook body: {}", String::from_utf8_lossy(body));
        let Some(path) = self.config.debug.dump_path.as_ref() else {
            return;
        };
        let _guard = self.dump_lock.lock().await;
        if let Err(e) = tokio::fs::write(path, body).await {
            log::warn!("writing request dump to {} failed: {}", path.display(), e);
        }
    }

    async fn annotate(&self, target: &Classifiable, labels: &LabelSet) -> Result<(), RelayError> {
        self.annotator
            .add_labels(target.account_id, target.conversation_id, labels)
            .await
            .map_err(|e| {
                log::error!(
                    "adding labels to conversation {} (account {}) failed: {}",
                    target.conversation_id,
                    target.account_id,
                    e
                );
                RelayError::Annotation(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeClassifier {
        result: fn() -> Result<LabelSet, AssistantError>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl FakeClassifier {
        fn new(result: fn() -> Result<LabelSet, AssistantError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn classify(&self, text: &str, _: &[Label]) -> Result<LabelSet, AssistantError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(text.to_string());
            (self.result)()
        }
    }

    struct FakeAnnotator {
        fail: bool,
        calls: Mutex<Vec<(u64, u64, LabelSet)>>,
    }

    impl FakeAnnotator {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Annotator for FakeAnnotator {
        async fn add_labels(
            &self,
            account_id: u64,
            conversation_id: u64,
            labels: &LabelSet,
        ) -> Result<(), ChatwootError> {
            self.calls
                .lock()
                .unwrap()
                .push((account_id, conversation_id, labels.clone()));
            if self.fail {
                Err(ChatwootError::Api("500 boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn billing() -> Result<LabelSet, AssistantError> {
        Ok([Label::Billing].into_iter().collect())
    }

    fn timeout() -> Result<LabelSet, AssistantError> {
        Err(AssistantError::Timeout(Duration::from_secs(3)))
    }

    fn test_config() -> Arc<Config> {
        let mut config = Config::default();
        config.gateway.auth_token = "secret".to_string();
        Arc::new(config)
    }

    fn refund_body() -> Vec<u8> {
        json!({
            "event": "conversation_created",
            "id": 42,
            "messages": [{ "content": "I want a refund", "account_id": 3 }]
        })
        .to_string()
        .into_bytes()
    }

    fn token(value: &str) -> Vec<(String, String)> {
        vec![("token".to_string(), value.to_string())]
    }

    async fn run(
        relay: &Relay,
        method: Method,
        headers: HeaderMap,
        query: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Result<Annotated, RelayError> {
        relay
            .handle(InboundRequest {
                method: &method,
                headers: &headers,
                query: &query,
                body: &body,
            })
            .await
    }

    #[tokio::test]
    async fn refund_message_is_labelled_billing() {
        let classifier = FakeClassifier::new(billing);
        let annotator = FakeAnnotator::new(false);
        let relay = Relay::new(test_config(), classifier.clone(), annotator.clone());

        let done = run(&relay, Method::POST, HeaderMap::new(), token("secret"), refund_body())
            .await
            .unwrap();
        assert_eq!(done.conversation_id, 42);
        assert_eq!(done.account_id, 3);
        assert_eq!(done.labels.names(), vec!["billing"]);
        assert_eq!(
            *classifier.seen.lock().unwrap(),
            vec!["I want a refund".to_string()]
        );
        let calls = annotator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 3);
        assert_eq!(calls[0].1, 42);
    }

    #[tokio::test]
    async fn same_payload_twice_runs_twice() {
        let classifier = FakeClassifier::new(billing);
        let annotator = FakeAnnotator::new(false);
        let relay = Relay::new(test_config(), classifier.clone(), annotator.clone());

        for _ in 0..2 {
            run(&relay, Method::POST, HeaderMap::new(), token("secret"), refund_body())
                .await
                .unwrap();
        }
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(annotator.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn classifier_timeout_fails_without_annotating() {
        let annotator = FakeAnnotator::new(false);
        let relay = Relay::new(test_config(), FakeClassifier::new(timeout), annotator.clone());

        let err = run(&relay, Method::POST, HeaderMap::new(), token("secret"), refund_body())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Classification(_)));
        assert_eq!(err.to_string(), "Failed to get label from message");
        assert!(annotator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn annotation_failure_is_reported() {
        let relay = Relay::new(
            test_config(),
            FakeClassifier::new(billing),
            FakeAnnotator::new(true),
        );
        let err = run(&relay, Method::POST, HeaderMap::new(), token("secret"), refund_body())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to add label");
    }

    #[tokio::test]
    async fn rejected_requests_never_reach_the_classifier() {
        let classifier = FakeClassifier::new(billing);
        let relay = Relay::new(test_config(), classifier.clone(), FakeAnnotator::new(false));

        let err = run(&relay, Method::GET, HeaderMap::new(), token("secret"), refund_body())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request method");

        let err = run(&relay, Method::POST, HeaderMap::new(), token("wrong"), refund_body())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid auth key");

        let body = json!({ "event": "conversation_created", "id": 1, "messages": [] });
        let err = run(
            &relay,
            Method::POST,
            HeaderMap::new(),
            token("secret"),
            body.to_string().into_bytes(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Conversation messages are empty");

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dump_path_receives_body() {
        let path = std::env::temp_dir().join(format!("relay-dump-{}", uuid::Uuid::new_v4()));
        let mut config = Config::default();
        config.gateway.auth_token = "secret".to_string();
        config.debug.dump_path = Some(path.clone());
        let relay = Relay::new(
            Arc::new(config),
            FakeClassifier::new(billing),
            FakeAnnotator::new(false),
        );

        run(&relay, Method::POST, HeaderMap::new(), token("secret"), refund_body())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).ok(), Some(refund_body()));

        let err = run(&relay, Method::POST, HeaderMap::new(), token("wrong"), b"other".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Auth(_)));
        assert_eq!(std::fs::read(&path).ok(), Some(refund_body()));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn concurrent_dumps_leave_one_whole_body() {
        let path = std::env::temp_dir().join(format!("relay-dump-{}", uuid::Uuid::new_v4()));
        let mut config = Config::default();
        config.gateway.auth_token = "secret".to_string();
        config.debug.dump_path = Some(path.clone());
        let relay = Arc::new(Relay::new(
            Arc::new(config),
            FakeClassifier::new(billing),
            FakeAnnotator::new(false),
        ));

        let bodies: Vec<Vec<u8>> = (0..8)
            .map(|i| {
                json!({
                    "event": "conversation_created",
                    "id": i,
                    "messages": [{ "content": "x".repeat(64 * 1024 + i), "account_id": 1 }]
                })
                .to_string()
                .into_bytes()
            })
            .collect();
        let mut tasks = Vec::new();
        for body in bodies.clone() {
            let relay = relay.clone();
            tasks.push(tokio::spawn(async move {
                run(&relay, Method::POST, HeaderMap::new(), token("secret"), body).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let written = std::fs::read(&path).unwrap();
        assert!(bodies.contains(&written));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn method_must_be_plain_post() {
        assert!(check_method(&Method::POST, &HeaderMap::new()).is_ok());
        for m in [Method::GET, Method::PUT, Method::DELETE, Method::PATCH] {
            assert!(matches!(
                check_method(&m, &HeaderMap::new()),
                Err(RelayError::Method)
            ));
        }
        let mut ajax = HeaderMap::new();
        ajax.insert("x-requested-with", "xmlhttprequest".parse().unwrap());
        assert!(matches!(
            check_method(&Method::POST, &ajax),
            Err(RelayError::Method)
        ));
    }

    #[test]
    fn token_checks() {
        assert!(check_token(&token("secret"), "secret").is_ok());
        assert!(matches!(
            check_token(&[], "secret"),
            Err(RelayError::Auth(AuthFailure::Mismatch))
        ));
        assert!(matches!(
            check_token(&token("Secret"), "secret"),
            Err(RelayError::Auth(AuthFailure::Mismatch))
        ));
        let twice = vec![
            ("token".to_string(), "secret".to_string()),
            ("token".to_string(), "secret".to_string()),
        ];
        let err = check_token(&twice, "secret").unwrap_err();
        assert_eq!(err.to_string(), "Authorization failed");
        let array = vec![("token[]".to_string(), "secret".to_string())];
        assert!(matches!(
            check_token(&array, "secret"),
            Err(RelayError::Auth(AuthFailure::Malformed))
        ));
        let other = vec![
            ("foo".to_string(), "bar".to_string()),
            ("token".to_string(), "secret".to_string()),
        ];
        assert!(check_token(&other, "secret").is_ok());
    }

    #[test]
    fn validation_order_and_messages() {
        let cases = [
            (json!("nope"), "Could not validate a request"),
            (json!({ "event": "conversation_created" }), "Could not validate a request"),
            (
                json!({ "event": "message_created", "id": 1, "messages": [] }),
                "Invalid event",
            ),
            (json!({ "event": "conversation_created", "id": 1 }), "Conversation messages are empty"),
            (
                json!({ "event": "conversation_created", "id": 1,
                        "messages": [{ "content": "", "account_id": 1 }] }),
                "Message content is empty",
            ),
        ];
        for (body, expected) in cases {
            let err = validate_event(body.to_string().as_bytes()).unwrap_err();
            assert_eq!(err.to_string(), expected, "body: {}", body);
        }
        assert!(matches!(
            validate_event(b"{").unwrap_err(),
            RelayError::Schema(_)
        ));
    }

    #[test]
    fn validation_uses_first_message() {
        let body = json!({
            "event": "conversation_created",
            "id": 9,
            "messages": [
                { "content": "first", "account_id": 2 },
                { "content": "", "account_id": 2 }
            ]
        });
        let target = validate_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(
            target,
            Classifiable {
                conversation_id: 9,
                account_id: 2,
                content: "first".to_string()
            }
        );
    }

    #[test]
    fn status_codes_by_mode() {
        let upstream = RelayError::Classification(AssistantError::Timeout(Duration::from_secs(3)));
        let auth = RelayError::Auth(AuthFailure::Mismatch);
        for err in [&upstream, &auth, &RelayError::Method, &RelayError::EmptyContent] {
            assert_eq!(
                err.status(ErrorStatusMode::Uniform),
                StatusCode::INTERNAL_SERVER_ERROR
            );
        }
        let d = ErrorStatusMode::Differentiated;
        assert_eq!(upstream.status(d), StatusCode::BAD_GATEWAY);
        assert_eq!(auth.status(d), StatusCode::UNAUTHORIZED);
        assert_eq!(RelayError::Method.status(d), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(RelayError::EmptyContent.status(d), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            RelayError::Annotation(ChatwootError::Api("x".into())).status(d),
            StatusCode::BAD_GATEWAY
        );
    }
}
