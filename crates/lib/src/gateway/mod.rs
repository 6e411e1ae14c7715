//! Gateway: HTTP server for the webhook endpoint.
//!
//! Single port. `POST /?token=…` runs the relay pipeline; `GET /health` is a liveness probe.

mod protocol;
mod server;

pub use protocol::{ResponseStatus, WebhookResponse};
pub use server::{build_router, run_gateway};
