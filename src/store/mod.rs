//! Storage seam for the order -> payment -> ticket pipeline.
//!
//! ## Unit of work
//!
//! Every operation takes `&mut Self::Tx`, an open transaction:
//!
//! 1. `begin()` opens it
//! 2. reads and writes go through it
//! 3. `commit(tx)` makes the writes durable
//!
//! Dropping a `Tx` without committing rolls it back. Services rely on this
//! for all-or-nothing behaviour: returning early with `?` discards the work.
//!
//! ## Locking
//!
//! `lock_*` reads take an exclusive lock on the row until the `Tx` ends.
//! Admission locks the ticket type before counting committed units, and
//! issuance locks the order before counting its tickets, so neither
//! check-then-write can interleave with a concurrent one.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Order, OrderItem, OrderStatus, Payment, PaymentStatus, PayoutAmounts, PayoutPlan, Ticket,
    TicketType, WebhookEvent,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait PipelineStore: Send + Sync + 'static {
    /// Open transaction type of this backend.
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    // ── Catalog reader ───────────────────────────────────────────────────────

    async fn event_exists(&self, tx: &mut Self::Tx, event_id: Uuid) -> Result<bool, StoreError>;

    /// Ticket type `ticket_type_id` if it belongs to `event_id`, locked for the rest of `tx`.
    async fn lock_ticket_type(
        &self,
        tx: &mut Self::Tx,
        event_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<Option<TicketType>, StoreError>;

    /// Units of a ticket type on orders that still hold inventory (pending or paid).
    async fn committed_units(
        &self,
        tx: &mut Self::Tx,
        ticket_type_id: Uuid,
    ) -> Result<i64, StoreError>;

    /// Units of a ticket type the buyer holds on pending or paid orders.
    async fn buyer_units(
        &self,
        tx: &mut Self::Tx,
        buyer_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<i64, StoreError>;

    // ── Orders and payments ──────────────────────────────────────────────────

    async fn insert_order(
        &self,
        tx: &mut Self::Tx,
        order: &Order,
        items: &[OrderItem],
    ) -> Result<(), StoreError>;

    async fn insert_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<(), StoreError>;

    async fn find_order(&self, tx: &mut Self::Tx, order_id: Uuid)
        -> Result<Option<Order>, StoreError>;

    /// Like [`find_order`](Self::find_order), holding the row lock until `tx` ends.
    async fn lock_order(&self, tx: &mut Self::Tx, order_id: Uuid)
        -> Result<Option<Order>, StoreError>;

    async fn order_items(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Vec<OrderItem>, StoreError>;

    async fn set_order_status(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn find_payment_for_order(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Option<Payment>, StoreError>;

    async fn lock_payment_by_token(
        &self,
        tx: &mut Self::Tx,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    async fn set_payment_status(
        &self,
        tx: &mut Self::Tx,
        payment_id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ── Replay ledger ────────────────────────────────────────────────────────

    /// Record a notification. Returns `false` without writing when the
    /// idempotency key is already present; the check and the insert are one
    /// atomic step.
    async fn claim_webhook(
        &self,
        tx: &mut Self::Tx,
        event: &WebhookEvent,
    ) -> Result<bool, StoreError>;

    // ── Tickets ──────────────────────────────────────────────────────────────

    async fn count_tickets(&self, tx: &mut Self::Tx, order_id: Uuid) -> Result<i64, StoreError>;

    async fn insert_tickets(&self, tx: &mut Self::Tx, tickets: &[Ticket]) -> Result<(), StoreError>;

    /// Tickets on the buyer's paid orders, oldest first.
    async fn tickets_for_buyer(
        &self,
        tx: &mut Self::Tx,
        buyer_id: Uuid,
    ) -> Result<Vec<Ticket>, StoreError>;

    async fn lock_ticket_by_token(
        &self,
        tx: &mut Self::Tx,
        scan_token: &str,
    ) -> Result<Option<Ticket>, StoreError>;

    async fn mark_ticket_used(
        &self,
        tx: &mut Self::Tx,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ── Settlement ───────────────────────────────────────────────────────────

    /// Events whose latest session ended before `cutoff` and that have no payout plan.
    async fn events_due_for_payout(
        &self,
        tx: &mut Self::Tx,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Returns `false` when the event already has a plan.
    async fn insert_payout_plan(&self, tx: &mut Self::Tx, plan: &PayoutPlan)
        -> Result<bool, StoreError>;

    /// Pending plans scheduled at or before `now`.
    async fn due_payout_plans(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<PayoutPlan>, StoreError>;

    /// Sum of `total_amount` over the event's paid orders.
    async fn paid_gross(&self, tx: &mut Self::Tx, event_id: Uuid) -> Result<BigDecimal, StoreError>;

    /// Write all amounts and flip the plan to processed. Returns `false` if
    /// the plan was no longer pending.
    async fn complete_payout_plan(
        &self,
        tx: &mut Self::Tx,
        plan_id: Uuid,
        amounts: &PayoutAmounts,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
