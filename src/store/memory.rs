//! In-process backend.
//!
//! The whole state sits behind one async mutex. A `MemoryTx` owns the lock
//! for its lifetime together with a working copy of the state; `commit`
//! writes the copy back and dropping the `Tx` discards it. Transactions are
//! therefore fully serialized, which trivially satisfies every lock the
//! trait asks for.
//!
//! There is no catalog subsystem behind this backend, so catalog rows are
//! added with the `seed_*` methods.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::PipelineStore;
use crate::error::StoreError;
use crate::models::{
    Event, EventSession, Order, OrderItem, OrderStatus, Payment, PaymentStatus, PayoutAmounts,
    PayoutPlan, PayoutStatus, Ticket, TicketStatus, TicketType, WebhookEvent,
};

#[derive(Debug, Clone, Default)]
struct State {
    events: HashMap<Uuid, Event>,
    sessions: Vec<EventSession>,
    ticket_types: HashMap<Uuid, TicketType>,
    orders: HashMap<Uuid, Order>,
    // order id -> lines in checkout order
    order_items: HashMap<Uuid, Vec<OrderItem>>,
    payments: HashMap<Uuid, Payment>,
    // idempotency key -> event
    webhook_events: BTreeMap<String, WebhookEvent>,
    tickets: Vec<Ticket>,
    payout_plans: Vec<PayoutPlan>,
}

impl State {
    fn units_where(&self, ticket_type_id: Uuid, held_by: impl Fn(&Order) -> bool) -> i64 {
        self.orders
            .values()
            .filter(|o| o.status.holds_inventory() && held_by(o))
            .flat_map(|o| self.order_items.get(&o.id).into_iter().flatten())
            .filter(|item| item.ticket_type_id == ticket_type_id)
            .map(|item| i64::from(item.quantity))
            .sum()
    }
}

/// Shared handle; clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_event(&self, event: Event) {
        self.state.lock().await.events.insert(event.id, event);
    }

    pub async fn seed_session(&self, session: EventSession) {
        self.state.lock().await.sessions.push(session);
    }

    pub async fn seed_ticket_type(&self, ticket_type: TicketType) {
        self.state
            .lock()
            .await
            .ticket_types
            .insert(ticket_type.id, ticket_type);
    }

    /// Overwrite an order's status, standing in for the external
    /// cancellation and refund flows.
    pub async fn force_order_status(&self, order_id: Uuid, status: OrderStatus) {
        if let Some(order) = self.state.lock().await.orders.get_mut(&order_id) {
            order.status = status;
            order.updated_at = Some(Utc::now());
        }
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    pub async fn webhook_events(&self) -> Vec<WebhookEvent> {
        self.state.lock().await.webhook_events.values().cloned().collect()
    }

    pub async fn tickets(&self) -> Vec<Ticket> {
        self.state.lock().await.tickets.clone()
    }

    pub async fn payout_plans(&self) -> Vec<PayoutPlan> {
        self.state.lock().await.payout_plans.clone()
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = tx;
        *guard = working;
        Ok(())
    }

    async fn event_exists(&self, tx: &mut Self::Tx, event_id: Uuid) -> Result<bool, StoreError> {
        Ok(tx.working.events.contains_key(&event_id))
    }

    async fn lock_ticket_type(
        &self,
        tx: &mut Self::Tx,
        event_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<Option<TicketType>, StoreError> {
        Ok(tx
            .working
            .ticket_types
            .get(&ticket_type_id)
            .filter(|tt| tt.event_id == event_id)
            .cloned())
    }

    async fn committed_units(
        &self,
        tx: &mut Self::Tx,
        ticket_type_id: Uuid,
    ) -> Result<i64, StoreError> {
        Ok(tx.working.units_where(ticket_type_id, |_| true))
    }

    async fn buyer_units(
        &self,
        tx: &mut Self::Tx,
        buyer_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<i64, StoreError> {
        Ok(tx
            .working
            .units_where(ticket_type_id, |o| o.buyer_id == buyer_id))
    }

    async fn insert_order(
        &self,
        tx: &mut Self::Tx,
        order: &Order,
        items: &[OrderItem],
    ) -> Result<(), StoreError> {
        let state = &mut tx.working;
        if state.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict("order already exists".into()));
        }
        if !state.events.contains_key(&order.event_id) {
            return Err(StoreError::Corrupt(format!("order references unknown event {}", order.event_id)));
        }
        state.orders.insert(order.id, order.clone());
        state.order_items.insert(order.id, items.to_vec());
        Ok(())
    }

    async fn insert_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<(), StoreError> {
        let state = &mut tx.working;
        let duplicate = state.payments.values().any(|p| {
            p.id == payment.id
                || p.order_id == payment.order_id
                || p.provider_payment_id == payment.provider_payment_id
                || p.idempotency_key == payment.idempotency_key
        });
        if duplicate {
            return Err(StoreError::Conflict("payment already exists".into()));
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_order(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError> {
        Ok(tx.working.orders.get(&order_id).cloned())
    }

    async fn lock_order(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError> {
        self.find_order(tx, order_id).await
    }

    async fn order_items(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Vec<OrderItem>, StoreError> {
        Ok(tx
            .working
            .order_items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_order_status(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(order) = tx.working.orders.get_mut(&order_id) {
            order.status = status;
            order.updated_at = Some(at);
        }
        Ok(())
    }

    async fn find_payment_for_order(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(tx
            .working
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn lock_payment_by_token(
        &self,
        tx: &mut Self::Tx,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(tx
            .working
            .payments
            .values()
            .find(|p| p.provider_payment_id == provider_payment_id)
            .cloned())
    }

    async fn set_payment_status(
        &self,
        tx: &mut Self::Tx,
        payment_id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(payment) = tx.working.payments.get_mut(&payment_id) {
            payment.status = status;
            payment.updated_at = Some(at);
        }
        Ok(())
    }

    async fn claim_webhook(
        &self,
        tx: &mut Self::Tx,
        event: &WebhookEvent,
    ) -> Result<bool, StoreError> {
        let ledger = &mut tx.working.webhook_events;
        if ledger.contains_key(&event.idempotency_key) {
            return Ok(false);
        }
        ledger.insert(event.idempotency_key.clone(), event.clone());
        Ok(true)
    }

    async fn count_tickets(&self, tx: &mut Self::Tx, order_id: Uuid) -> Result<i64, StoreError> {
        Ok(tx
            .working
            .tickets
            .iter()
            .filter(|t| t.order_id == order_id)
            .count() as i64)
    }

    async fn insert_tickets(&self, tx: &mut Self::Tx, tickets: &[Ticket]) -> Result<(), StoreError> {
        let existing = &tx.working.tickets;
        let clash = tickets.iter().enumerate().any(|(i, t)| {
            existing.iter().any(|e| e.scan_token == t.scan_token || e.id == t.id)
                || tickets[..i].iter().any(|p| p.scan_token == t.scan_token)
        });
        if clash {
            return Err(StoreError::Conflict("ticket already exists".into()));
        }
        tx.working.tickets.extend_from_slice(tickets);
        Ok(())
    }

    async fn tickets_for_buyer(
        &self,
        tx: &mut Self::Tx,
        buyer_id: Uuid,
    ) -> Result<Vec<Ticket>, StoreError> {
        let state = &tx.working;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .iter()
            .filter(|t| {
                state
                    .orders
                    .get(&t.order_id)
                    .is_some_and(|o| o.buyer_id == buyer_id && o.status == OrderStatus::Paid)
            })
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));
        Ok(tickets)
    }

    async fn lock_ticket_by_token(
        &self,
        tx: &mut Self::Tx,
        scan_token: &str,
    ) -> Result<Option<Ticket>, StoreError> {
        Ok(tx
            .working
            .tickets
            .iter()
            .find(|t| t.scan_token == scan_token)
            .cloned())
    }

    async fn mark_ticket_used(
        &self,
        tx: &mut Self::Tx,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(ticket) = tx.working.tickets.iter_mut().find(|t| t.id == ticket_id) {
            ticket.status = TicketStatus::Used;
            ticket.used_at = Some(at);
        }
        Ok(())
    }

    async fn events_due_for_payout(
        &self,
        tx: &mut Self::Tx,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let state = &tx.working;
        let mut last_end: BTreeMap<Uuid, DateTime<Utc>> = BTreeMap::new();
        for session in &state.sessions {
            let end = session.effective_end();
            last_end
                .entry(session.event_id)
                .and_modify(|e| *e = (*e).max(end))
                .or_insert(end);
        }
        Ok(last_end
            .into_iter()
            .filter(|(event_id, end)| {
                *end < cutoff && !state.payout_plans.iter().any(|p| p.event_id == *event_id)
            })
            .map(|(event_id, _)| event_id)
            .collect())
    }

    async fn insert_payout_plan(
        &self,
        tx: &mut Self::Tx,
        plan: &PayoutPlan,
    ) -> Result<bool, StoreError> {
        let plans = &mut tx.working.payout_plans;
        if plans.iter().any(|p| p.event_id == plan.event_id) {
            return Ok(false);
        }
        plans.push(plan.clone());
        Ok(true)
    }

    async fn due_payout_plans(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<PayoutPlan>, StoreError> {
        let mut due: Vec<PayoutPlan> = tx
            .working
            .payout_plans
            .iter()
            .filter(|p| p.status == PayoutStatus::Pending && p.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|p| p.scheduled_at);
        Ok(due)
    }

    async fn paid_gross(&self, tx: &mut Self::Tx, event_id: Uuid) -> Result<BigDecimal, StoreError> {
        Ok(tx
            .working
            .orders
            .values()
            .filter(|o| o.event_id == event_id && o.status == OrderStatus::Paid)
            .fold(BigDecimal::from(0), |acc, o| acc + &o.total_amount))
    }

    async fn complete_payout_plan(
        &self,
        tx: &mut Self::Tx,
        plan_id: Uuid,
        amounts: &PayoutAmounts,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(plan) = tx
            .working
            .payout_plans
            .iter_mut()
            .find(|p| p.id == plan_id && p.status == PayoutStatus::Pending)
        else {
            return Ok(false);
        };
        plan.gross_amount = Some(amounts.gross.clone());
        plan.commission_amount = Some(amounts.commission.clone());
        plan.vat_amount = Some(amounts.vat.clone());
        plan.net_amount = Some(amounts.net.clone());
        plan.status = PayoutStatus::Processed;
        plan.processed_at = Some(at);
        Ok(true)
    }
}
