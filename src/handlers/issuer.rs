//! # Ticket Issuer
//!
//! The only code path that creates tickets. Runs inside the caller's
//! transaction after the order row is locked, so the "already issued" check
//! and the insert cannot interleave with a concurrent issuer for the same
//! order.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::handlers::random_token;
use crate::models::{OrderStatus, Ticket, TicketStatus};
use crate::store::PipelineStore;

/// 32 random bytes, 64 hex characters.
const SCAN_TOKEN_BYTES: usize = 32;

/// Issue one ticket per purchased unit of `order_id`.
///
/// Returns how many tickets were created. Missing orders, orders that are
/// not paid and orders that already have tickets are left untouched.
pub async fn issue_tickets<S: PipelineStore>(
    store: &S,
    tx: &mut S::Tx,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let Some(order) = store.lock_order(tx, order_id).await? else {
        debug!("Issuance skipped: order {} not found", order_id);
        return Ok(0);
    };
    if order.status != OrderStatus::Paid {
        debug!("Issuance skipped: order {} is {:?}", order_id, order.status);
        return Ok(0);
    }

    let existing = store.count_tickets(tx, order_id).await?;
    if existing > 0 {
        debug!("Issuance skipped: order {} already has {} ticket(s)", order_id, existing);
        return Ok(0);
    }

    let event_id = order.event_id;
    let items = store.order_items(tx, order_id).await?;
    let tickets: Vec<Ticket> = items
        .iter()
        .flat_map(|item| {
            (0..item.quantity).map(move |_| Ticket {
                id: Uuid::new_v4(),
                order_id,
                event_id,
                ticket_type_id: item.ticket_type_id,
                scan_token: random_token(SCAN_TOKEN_BYTES),
                status: TicketStatus::Active,
                issued_at: now,
                used_at: None,
            })
        })
        .collect();

    store.insert_tickets(tx, &tickets).await?;
    info!("Issued {} ticket(s) for order {}", tickets.len(), order_id);
    Ok(tickets.len())
}
