//! # Checkout Admission
//!
//! Validates a cart against the catalog and the units already committed,
//! then creates a pending order, its items and a pending payment in one
//! transaction. Every validation failure returns before commit, so a refused
//! checkout leaves no rows behind.
//!
//! Ticket types are locked before their committed units are counted, so two
//! concurrent checkouts for the same type cannot both pass the capacity check.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::error::CheckoutError;
use crate::handlers::random_token;
use crate::models::{
    CheckoutItem, CheckoutRequest, CheckoutResponse, Order, OrderItem, OrderStatus, Payment,
    PaymentStatus,
};
use crate::store::PipelineStore;

pub const SANDBOX_PROVIDER: &str = "sandbox";

/// Sum quantities per ticket type, keeping first-appearance order.
fn merge_lines(items: &[CheckoutItem]) -> Result<Vec<(Uuid, i64)>, CheckoutError> {
    let mut merged: Vec<(Uuid, i64)> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity <= 0 {
            return Err(CheckoutError::NonPositiveQuantity(item.ticket_type_id));
        }
        match merged.iter_mut().find(|(id, _)| *id == item.ticket_type_id) {
            Some((_, qty)) => *qty = qty.saturating_add(item.quantity),
            None => merged.push((item.ticket_type_id, item.quantity)),
        }
    }
    Ok(merged)
}

fn redirect_url(base: &str, token: &str, order_id: Uuid) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}token={token}&order={order_id}")
}

/// Admit a cart for `buyer_id`.
pub async fn admit<S: PipelineStore>(
    store: &S,
    payments: &PaymentsConfig,
    buyer_id: Uuid,
    req: &CheckoutRequest,
    now: DateTime<Utc>,
) -> Result<CheckoutResponse, CheckoutError> {
    let mut tx = store.begin().await?;

    if !store.event_exists(&mut tx, req.event_id).await? {
        return Err(CheckoutError::EventNotFound(req.event_id));
    }
    if req.items.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }
    let lines = merge_lines(&req.items)?;

    // Lock in id order so concurrent multi-type carts cannot deadlock.
    let mut lock_order: Vec<(Uuid, i64)> = lines.clone();
    lock_order.sort_by_key(|(id, _)| *id);

    let mut prices: HashMap<Uuid, BigDecimal> = HashMap::with_capacity(lines.len());
    for (ticket_type_id, requested) in lock_order {
        let tt = store
            .lock_ticket_type(&mut tx, req.event_id, ticket_type_id)
            .await?
            .ok_or(CheckoutError::InvalidTicketType(ticket_type_id))?;

        if !tt.on_sale_at(now) {
            return Err(CheckoutError::SalesClosed(ticket_type_id));
        }

        let committed = store.committed_units(&mut tx, ticket_type_id).await?;
        let capacity = i64::from(tt.capacity);
        if committed.saturating_add(requested) > capacity {
            warn!(
                "Capacity exceeded for ticket type {}: requested {}, committed {}, capacity {}",
                ticket_type_id, requested, committed, capacity
            );
            return Err(CheckoutError::CapacityExceeded {
                ticket_type_id,
                requested,
                available: (capacity - committed).max(0),
            });
        }

        let held = store.buyer_units(&mut tx, buyer_id, ticket_type_id).await?;
        let limit = i64::from(tt.per_person_limit);
        if held + requested > limit {
            return Err(CheckoutError::PerPersonLimitExceeded {
                ticket_type_id,
                limit,
                held,
                requested,
            });
        }

        prices.insert(ticket_type_id, tt.price);
    }

    let order_id = Uuid::new_v4();
    let mut total = BigDecimal::from(0);
    let mut items = Vec::with_capacity(lines.len());
    for (ticket_type_id, quantity) in lines {
        let unit_price = prices
            .remove(&ticket_type_id)
            .ok_or(CheckoutError::InvalidTicketType(ticket_type_id))?;
        // Bounded by capacity, which is an i32.
        let quantity = i32::try_from(quantity).map_err(|_| CheckoutError::CapacityExceeded {
            ticket_type_id,
            requested: quantity,
            available: 0,
        })?;
        total += &unit_price * &BigDecimal::from(quantity);
        items.push(OrderItem {
            id: Uuid::new_v4(),
            order_id,
            ticket_type_id,
            quantity,
            unit_price,
        });
    }

    let currency = req
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(payments.default_currency.as_str())
        .to_string();

    let order = Order {
        id: order_id,
        buyer_id,
        event_id: req.event_id,
        currency: currency.clone(),
        total_amount: total.clone(),
        status: OrderStatus::Pending,
        created_at: now,
        updated_at: None,
    };

    let token = random_token(16);
    let payment = Payment {
        id: Uuid::new_v4(),
        order_id,
        provider: SANDBOX_PROVIDER.to_string(),
        provider_payment_id: token.clone(),
        status: PaymentStatus::Pending,
        idempotency_key: format!("checkout:{order_id}"),
        amount: total,
        currency,
        created_at: now,
        updated_at: None,
    };

    store.insert_order(&mut tx, &order, &items).await?;
    store.insert_payment(&mut tx, &payment).await?;
    store.commit(tx).await?;

    info!(
        "Order {} created for buyer {}: {} line(s), total {} {}",
        order.id,
        buyer_id,
        items.len(),
        order.total_amount,
        order.currency
    );

    Ok(CheckoutResponse {
        order_id,
        provider: payment.provider,
        redirect_url: redirect_url(&payments.sandbox_redirect_base, &token, order_id),
        payment_token: token,
    })
}
