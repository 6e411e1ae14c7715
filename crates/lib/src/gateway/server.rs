//! Gateway HTTP server (single port).

use crate::config::Config;
use crate::gateway::protocol::WebhookResponse;
use crate::labels::Label;
use crate::relay::{InboundRequest, Relay, RelayError, SUCCESS_MESSAGE};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Shared state for the gateway.
#[derive(Clone)]
pub struct GatewayState {
    pub relay: Arc<Relay>,
}

/// Routes: any method on `/` goes to the webhook handler (which rejects non-POST), `GET /health`.
pub fn build_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", any(webhook))
        .route("/health", get(health_http))
        .with_state(GatewayState { relay })
}

/// Validate config, build the relay, and serve until SIGINT/SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    config.validate()?;
    let config = Arc::new(config);
    let relay = Arc::new(Relay::from_config(config.clone())?);
    if config.openai.assistant_id().is_none() {
        log::info!("no assistant id configured; a new assistant is created for each classification");
    }

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, build_router(relay))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("installing Ctrl+C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("installing SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// `/?token=…` — run the relay pipeline and answer with the JSON outcome.
async fn webhook(
    State(state): State<GatewayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> (StatusCode, Json<WebhookResponse>) {
    let query: Vec<(String, String)> = Query::try_from_uri(&uri)
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();
    let outcome = match body {
        Ok(body) => {
            let req = InboundRequest {
                method: &method,
                headers: &headers,
                query: &query,
                body: &body,
            };
            state.relay.handle(req).await
        }
        // Gate first so an oversized GET still reads as a method failure.
        Err(rejection) => state
            .relay
            .check_gate(&method, &headers, &query)
            .and(Err(RelayError::Body(rejection))),
    };
    match outcome {
        Ok(done) => {
            log::info!(
                "conversation {} (account {}) labelled [{}]",
                done.conversation_id,
                done.account_id,
                done.labels
            );
            (StatusCode::OK, Json(WebhookResponse::success(SUCCESS_MESSAGE)))
        }
        Err(e) => {
            log::info!("webhook {} {} failed: {}", method, uri.path(), e);
            let status = e.status(state.relay.config().gateway.error_status);
            (status, Json(WebhookResponse::failed(e.to_string())))
        }
    }
}

/// GET /health returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let labels: Vec<&str> = state.relay.labels().iter().map(Label::as_str).collect();
    Json(json!({
        "runtime": "running",
        "labels": labels,
    }))
}
