//! # Webhook Ingestor
//!
//! Turns an at-least-once provider delivery into an exactly-once state
//! change. Steps, in order:
//!
//! 1. both headers present, idempotency key at most 64 chars
//! 2. body parses as a [`WebhookPayload`]
//! 3. signature matches the canonical payload
//! 4. the idempotency key is claimed in the replay ledger
//! 5. the payment is looked up by provider token
//! 6. the state machine runs (and the issuer with it)
//!
//! Steps 4 to 6 share one transaction. A replayed key returns
//! [`WebhookStatus::Ignored`] before touching anything; an infrastructure
//! failure rolls the ledger row back with the rest, so the provider's retry
//! is processed normally.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::WebhookError;
use crate::handlers::checkout::SANDBOX_PROVIDER;
use crate::handlers::payment::apply_notification;
use crate::models::{WebhookEvent, WebhookPayload, WebhookStatus};
use crate::signature;
use crate::store::PipelineStore;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// Matches the `webhook_events.idempotency_key` column width.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;

fn present(header: Option<&str>) -> Option<&str> {
    header.map(str::trim).filter(|v| !v.is_empty())
}

pub async fn ingest<S: PipelineStore>(
    store: &S,
    secret: &str,
    signature_header: Option<&str>,
    idempotency_key: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<WebhookStatus, WebhookError> {
    let (Some(signature_hex), Some(key)) = (present(signature_header), present(idempotency_key))
    else {
        return Err(WebhookError::MissingHeaders);
    };
    if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(WebhookError::IdempotencyKeyTooLong);
    }

    let payload: WebhookPayload =
        serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    if !signature::verify(secret, &signature::canonical_bytes(&payload), signature_hex) {
        warn!("Rejected notification for {}: bad signature", payload.payment_id);
        return Err(WebhookError::InvalidSignature);
    }

    let mut tx = store.begin().await?;
    let ledger_entry = WebhookEvent {
        id: Uuid::new_v4(),
        idempotency_key: key.to_string(),
        provider: SANDBOX_PROVIDER.to_string(),
        provider_event_id: payload.payment_id.clone(),
        raw_payload: String::from_utf8_lossy(body).into_owned(),
        received_at: now,
    };
    if !store.claim_webhook(&mut tx, &ledger_entry).await? {
        info!("Notification {} already processed; ignoring", key);
        return Ok(WebhookStatus::Ignored);
    }

    let Some(payment) = store.lock_payment_by_token(&mut tx, &payload.payment_id).await? else {
        // Keep the ledger row so retries of an unknown token stay cheap.
        store.commit(tx).await?;
        warn!("Notification {} names unknown payment {}", key, payload.payment_id);
        return Err(WebhookError::PaymentNotFound(payload.payment_id));
    };

    let status = apply_notification(store, &mut tx, &payment, &payload, now).await?;
    store.commit(tx).await?;
    info!(
        "Notification {} ({}) for payment {}: {:?}",
        key, payload.event_type, payment.id, status
    );
    Ok(status)
}
