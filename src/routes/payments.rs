//! Payment provider routes.
//!
//! POST /payments/webhook           - signed provider notification
//! POST /payments/sandbox/complete  - sandbox provider: simulate the outcome
//!                                    (only when `PAYMENTS_SANDBOX_ENABLED`)

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Extension, Json, Router};
use chrono::Utc;

use crate::error::AppError;
use crate::handlers::{sandbox, webhook};
use crate::models::{SandboxCompleteRequest, WebhookResponse};
use crate::state::AppState;
use crate::store::PipelineStore;

pub fn router<S: PipelineStore>(sandbox_enabled: bool) -> Router {
    let router = Router::new().route("/payments/webhook", post(receive_webhook::<S>));
    if sandbox_enabled {
        router.route("/payments/sandbox/complete", post(sandbox_complete::<S>))
    } else {
        router
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The body is taken raw; the ingestor parses it after the header checks.
async fn receive_webhook<S: PipelineStore>(
    Extension(state): Extension<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let status = webhook::ingest(
        state.store.as_ref(),
        &state.payments.webhook_secret,
        header(&headers, webhook::SIGNATURE_HEADER),
        header(&headers, webhook::IDEMPOTENCY_HEADER),
        &body,
        Utc::now(),
    )
    .await?;
    Ok(Json(WebhookResponse { status }))
}

async fn sandbox_complete<S: PipelineStore>(
    Extension(state): Extension<AppState<S>>,
    Json(req): Json<SandboxCompleteRequest>,
) -> Result<Json<WebhookResponse>, AppError> {
    let status = sandbox::complete(
        state.store.as_ref(),
        &state.payments.webhook_secret,
        &req,
        Utc::now(),
    )
    .await?;
    Ok(Json(WebhookResponse { status }))
}
