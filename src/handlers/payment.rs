//! # Payment State Machine
//!
//! Applies an authenticated, first-seen provider notification to its
//! payment/order pair. Runs inside the ingestor's transaction.
//!
//! | payment before | notification        | payment after | order            |
//! |----------------|---------------------|---------------|------------------|
//! | pending        | `payment_succeeded` | succeeded     | pending -> paid  |
//! | pending        | `payment_failed`    | failed        | stays pending    |
//! | failed         | `payment_succeeded` | succeeded     | pending -> paid  |
//! | succeeded      | `payment_succeeded` | succeeded     | unchanged        |
//!
//! Every successful notification re-invokes the issuer, which is a no-op once
//! tickets exist. Anything not in the table is acknowledged as ignored.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::handlers::issuer::issue_tickets;
use crate::models::{OrderStatus, Payment, PaymentStatus, WebhookPayload, WebhookStatus};
use crate::store::PipelineStore;

/// Provider notification kinds this service acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Succeeded,
    Failed,
    Other,
}

impl Notification {
    pub fn parse(event_type: &str) -> Self {
        match event_type.trim() {
            "payment_succeeded" => Self::Succeeded,
            "payment_failed" => Self::Failed,
            _ => Self::Other,
        }
    }

    fn target(self) -> Option<PaymentStatus> {
        match self {
            Self::Succeeded => Some(PaymentStatus::Succeeded),
            Self::Failed => Some(PaymentStatus::Failed),
            Self::Other => None,
        }
    }
}

/// Advance `payment` (already locked in `tx`) according to `payload`.
pub async fn apply_notification<S: PipelineStore>(
    store: &S,
    tx: &mut S::Tx,
    payment: &Payment,
    payload: &WebhookPayload,
    now: DateTime<Utc>,
) -> Result<WebhookStatus, StoreError> {
    let Some(target) = Notification::parse(&payload.event_type).target() else {
        debug!(
            "Ignoring '{}' notification for payment {}",
            payload.event_type, payment.id
        );
        return Ok(WebhookStatus::Ignored);
    };

    warn_on_mismatch(payment, payload);

    if !payment.status.can_transition_to(target) {
        warn!(
            "Payment {} is {:?}; ignoring transition to {:?}",
            payment.id, payment.status, target
        );
        return Ok(WebhookStatus::Ignored);
    }

    if payment.status != target {
        store.set_payment_status(tx, payment.id, target, now).await?;
        info!("Payment {} {:?} -> {:?}", payment.id, payment.status, target);
    }

    if target == PaymentStatus::Failed {
        return Ok(WebhookStatus::Processed);
    }

    match store.lock_order(tx, payment.order_id).await? {
        Some(order) if order.status == OrderStatus::Pending => {
            store.set_order_status(tx, order.id, OrderStatus::Paid, now).await?;
            info!("Order {} marked paid", order.id);
        }
        Some(order) if order.status == OrderStatus::Paid => {}
        Some(order) => {
            warn!(
                "Payment {} succeeded but order {} is {:?}; not reviving it",
                payment.id, order.id, order.status
            );
        }
        None => {
            warn!("Payment {} references missing order {}", payment.id, payment.order_id);
        }
    }

    issue_tickets(store, tx, payment.order_id, now).await?;
    Ok(WebhookStatus::Processed)
}

// Provider metadata is informational; the stored payment is authoritative.
fn warn_on_mismatch(payment: &Payment, payload: &WebhookPayload) {
    if let Some(amount) = &payload.amount {
        if *amount != payment.amount {
            warn!(
                "Payment {}: notification amount {} differs from recorded {}",
                payment.id, amount, payment.amount
            );
        }
    }
    if let Some(currency) = &payload.currency {
        if !currency.eq_ignore_ascii_case(&payment.currency) {
            warn!(
                "Payment {}: notification currency {} differs from recorded {}",
                payment.id, currency, payment.currency
            );
        }
    }
    if let Some(order_id) = &payload.order_id {
        if *order_id != payment.order_id.to_string() {
            warn!(
                "Payment {}: notification order {} differs from recorded {}",
                payment.id, order_id, payment.order_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentsConfig;
    use crate::handlers::checkout::admit;
    use crate::handlers::fixtures::{catalog, Catalog};
    use crate::models::{CheckoutItem, CheckoutRequest, TicketStatus};
    use crate::store::MemoryStore;
    use uuid::Uuid;

    async fn pending_order(quantity: i64) -> (Catalog, String) {
        let c = catalog(100, 10).await;
        let req = CheckoutRequest {
            event_id: c.event_id,
            items: vec![CheckoutItem { ticket_type_id: c.ticket_type_id, quantity }],
            currency: None,
        };
        let res = admit(&c.store, &PaymentsConfig::default(), Uuid::new_v4(), &req, Utc::now())
            .await
            .unwrap();
        (c, res.payment_token)
    }

    fn notification(event_type: &str, token: &str) -> WebhookPayload {
        WebhookPayload {
            event_type: event_type.into(),
            payment_id: token.into(),
            order_id: None,
            amount: None,
            currency: None,
        }
    }

    async fn deliver(store: &MemoryStore, payload: &WebhookPayload) -> WebhookStatus {
        let mut tx = store.begin().await.unwrap();
        let payment = store
            .lock_payment_by_token(&mut tx, &payload.payment_id)
            .await
            .unwrap()
            .unwrap();
        let status = apply_notification(store, &mut tx, &payment, payload, Utc::now())
            .await
            .unwrap();
        store.commit(tx).await.unwrap();
        status
    }

    #[test]
    fn parses_known_event_types() {
        assert_eq!(Notification::parse("payment_succeeded"), Notification::Succeeded);
        assert_eq!(Notification::parse("payment_failed"), Notification::Failed);
        assert_eq!(Notification::parse("payment_refunded"), Notification::Other);
    }

    #[tokio::test]
    async fn success_pays_order_and_issues_once() {
        let (c, token) = pending_order(2).await;
        let ok = notification("payment_succeeded", &token);

        assert_eq!(deliver(&c.store, &ok).await, WebhookStatus::Processed);
        assert_eq!(deliver(&c.store, &ok).await, WebhookStatus::Processed);

        assert_eq!(c.store.payments().await[0].status, PaymentStatus::Succeeded);
        assert_eq!(c.store.orders().await[0].status, OrderStatus::Paid);
        let tickets = c.store.tickets().await;
        assert_eq!(tickets.len(), 2);
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Active));
    }

    #[tokio::test]
    async fn failure_leaves_order_pending_and_is_recoverable() {
        let (c, token) = pending_order(1).await;

        deliver(&c.store, &notification("payment_failed", &token)).await;
        assert_eq!(c.store.payments().await[0].status, PaymentStatus::Failed);
        assert_eq!(c.store.orders().await[0].status, OrderStatus::Pending);
        assert!(c.store.tickets().await.is_empty());

        deliver(&c.store, &notification("payment_succeeded", &token)).await;
        assert_eq!(c.store.orders().await[0].status, OrderStatus::Paid);
        assert_eq!(c.store.tickets().await.len(), 1);
    }

    #[tokio::test]
    async fn failure_after_success_is_ignored() {
        let (c, token) = pending_order(1).await;
        deliver(&c.store, &notification("payment_succeeded", &token)).await;

        let status = deliver(&c.store, &notification("payment_failed", &token)).await;
        assert_eq!(status, WebhookStatus::Ignored);
        assert_eq!(c.store.payments().await[0].status, PaymentStatus::Succeeded);
        assert_eq!(c.store.orders().await[0].status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn unknown_event_type_changes_nothing() {
        let (c, token) = pending_order(1).await;
        let status = deliver(&c.store, &notification("payment_disputed", &token)).await;
        assert_eq!(status, WebhookStatus::Ignored);
        assert_eq!(c.store.payments().await[0].status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn canceled_order_is_not_revived() {
        let (c, token) = pending_order(1).await;
        let order_id = c.store.orders().await[0].id;
        c.store.force_order_status(order_id, OrderStatus::Canceled).await;

        deliver(&c.store, &notification("payment_succeeded", &token)).await;
        assert_eq!(c.store.orders().await[0].status, OrderStatus::Canceled);
        assert!(c.store.tickets().await.is_empty());
    }

    #[tokio::test]
    async fn mismatched_metadata_does_not_block() {
        let (c, token) = pending_order(1).await;
        let mut ok = notification("payment_succeeded", &token);
        ok.amount = Some(bigdecimal::BigDecimal::from(1));
        ok.currency = Some("EUR".into());
        ok.order_id = Some("someone-else".into());

        assert_eq!(deliver(&c.store, &ok).await, WebhookStatus::Processed);
        assert_eq!(c.store.tickets().await.len(), 1);
    }
}
