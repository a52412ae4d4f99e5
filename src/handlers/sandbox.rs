//! Sandbox payment provider.
//!
//! Stands in for the external provider behind the checkout redirect URL: it
//! builds the notification the real provider would send, signs it with the
//! shared secret and delivers it through the regular ingestor.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::handlers::webhook::ingest;
use crate::models::{SandboxCompleteRequest, SandboxOutcome, WebhookPayload, WebhookStatus};
use crate::signature;
use crate::store::PipelineStore;

impl SandboxOutcome {
    pub fn event_type(self) -> &'static str {
        match self {
            Self::Succeeded => "payment_succeeded",
            Self::Failed => "payment_failed",
        }
    }
}

pub async fn complete<S: PipelineStore>(
    store: &S,
    secret: &str,
    req: &SandboxCompleteRequest,
    now: DateTime<Utc>,
) -> Result<WebhookStatus, WebhookError> {
    let payment = {
        let mut tx = store.begin().await?;
        store.lock_payment_by_token(&mut tx, &req.payment_token).await?
    };
    let Some(payment) = payment else {
        return Err(WebhookError::PaymentNotFound(req.payment_token.clone()));
    };

    let payload = WebhookPayload {
        event_type: req.outcome.event_type().to_string(),
        payment_id: payment.provider_payment_id,
        order_id: Some(payment.order_id.to_string()),
        amount: Some(payment.amount),
        currency: Some(payment.currency),
    };
    let body = signature::canonical_bytes(&payload);
    let sig = signature::sign(secret, &body);
    let key = format!("sandbox:{}", Uuid::new_v4());

    info!("Sandbox delivering {} for order {}", payload.event_type, payment.order_id);
    ingest(store, secret, Some(&sig), Some(&key), &body, now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentsConfig;
    use crate::handlers::checkout::admit;
    use crate::handlers::fixtures::catalog;
    use crate::models::{CheckoutItem, CheckoutRequest, OrderStatus};

    #[tokio::test]
    async fn completion_flows_through_the_ingestor() {
        let c = catalog(100, 10).await;
        let req = CheckoutRequest {
            event_id: c.event_id,
            items: vec![CheckoutItem { ticket_type_id: c.ticket_type_id, quantity: 2 }],
            currency: None,
        };
        let res = admit(&c.store, &PaymentsConfig::default(), Uuid::new_v4(), &req, Utc::now())
            .await
            .unwrap();

        let done = SandboxCompleteRequest {
            payment_token: res.payment_token.clone(),
            outcome: SandboxOutcome::Succeeded,
        };
        let status = complete(&c.store, "sandbox-secret", &done, Utc::now()).await.unwrap();
        assert_eq!(status, WebhookStatus::Processed);
        assert_eq!(c.store.orders().await[0].status, OrderStatus::Paid);
        assert_eq!(c.store.tickets().await.len(), 2);

        let ledger = c.store.webhook_events().await;
        assert_eq!(ledger.len(), 1);
        assert!(ledger[0].idempotency_key.starts_with("sandbox:"));
        assert!(ledger[0].idempotency_key.len() <= 64);
    }

    #[tokio::test]
    async fn unknown_token_is_not_delivered() {
        let c = catalog(100, 10).await;
        let done = SandboxCompleteRequest {
            payment_token: "missing".into(),
            outcome: SandboxOutcome::Failed,
        };
        let err = complete(&c.store, "sandbox-secret", &done, Utc::now()).await.unwrap_err();
        assert!(matches!(err, WebhookError::PaymentNotFound(_)));
        assert!(c.store.webhook_events().await.is_empty());
    }
}
