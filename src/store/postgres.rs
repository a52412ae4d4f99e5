//! `PostgreSQL` backend.
//!
//! One sqlx transaction per unit of work. Row locks use `SELECT ... FOR UPDATE`,
//! except ticket types, which take `FOR NO KEY UPDATE` so admissions still
//! serialize while ticket and order item inserts can take their foreign-key
//! share locks without waiting. The replay ledger relies on the unique index on `webhook_events.idempotency_key`
//! through `INSERT ... ON CONFLICT DO NOTHING RETURNING`, so a concurrent
//! delivery of the same key blocks until the first transaction ends and then
//! sees the conflict.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::PipelineStore;
use crate::db::AppDb;
use crate::error::StoreError;
use crate::models::{
    Order, OrderItem, OrderStatus, Payment, PaymentStatus, PayoutAmounts, PayoutPlan, Ticket,
    TicketStatus, TicketType, WebhookEvent,
};

#[derive(Clone)]
pub struct PgStore {
    pool: AppDb,
}

impl PgStore {
    pub fn new(pool: AppDb) -> Self {
        Self { pool }
    }
}

fn on_unique(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{what} already exists"))
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        Ok(tx.commit().await?)
    }

    async fn event_exists(&self, tx: &mut Self::Tx, event_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE id = $1)")
            .bind(event_id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(exists)
    }

    async fn lock_ticket_type(
        &self,
        tx: &mut Self::Tx,
        event_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<Option<TicketType>, StoreError> {
        let tt = sqlx::query_as::<_, TicketType>(
            "SELECT * FROM ticket_types WHERE id = $1 AND event_id = $2 FOR NO KEY UPDATE",
        )
        .bind(ticket_type_id)
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(tt)
    }

    async fn committed_units(
        &self,
        tx: &mut Self::Tx,
        ticket_type_id: Uuid,
    ) -> Result<i64, StoreError> {
        let units: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(oi.quantity), 0)::BIGINT
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE oi.ticket_type_id = $1
              AND o.status IN ('pending', 'paid')
            "#,
        )
        .bind(ticket_type_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(units)
    }

    async fn buyer_units(
        &self,
        tx: &mut Self::Tx,
        buyer_id: Uuid,
        ticket_type_id: Uuid,
    ) -> Result<i64, StoreError> {
        let units: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(oi.quantity), 0)::BIGINT
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE oi.ticket_type_id = $1
              AND o.buyer_id = $2
              AND o.status IN ('pending', 'paid')
            "#,
        )
        .bind(ticket_type_id)
        .bind(buyer_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(units)
    }

    async fn insert_order(
        &self,
        tx: &mut Self::Tx,
        order: &Order,
        items: &[OrderItem],
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, buyer_id, event_id, currency, total_amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id)
        .bind(order.buyer_id)
        .bind(order.event_id)
        .bind(&order.currency)
        .bind(&order.total_amount)
        .bind(order.status)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| on_unique(e, "order"))?;

        for (line_no, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, line_no, ticket_type_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(line_no as i32)
            .bind(item.ticket_type_id)
            .bind(item.quantity)
            .bind(&item.unit_price)
            .execute(&mut **tx)
            .await
            .map_err(|e| on_unique(e, "order item"))?;
        }
        Ok(())
    }

    async fn insert_payment(&self, tx: &mut Self::Tx, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, order_id, provider, provider_payment_id, status, idempotency_key,
                 amount, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(&payment.provider)
        .bind(&payment.provider_payment_id)
        .bind(payment.status)
        .bind(&payment.idempotency_key)
        .bind(&payment.amount)
        .bind(&payment.currency)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| on_unique(e, "payment"))?;
        Ok(())
    }

    async fn find_order(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(order)
    }

    async fn lock_order(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(order)
    }

    async fn order_items(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Vec<OrderItem>, StoreError> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY line_no",
        )
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(items)
    }

    async fn set_order_status(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order_id)
            .bind(status)
            .bind(at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn find_payment_for_order(
        &self,
        tx: &mut Self::Tx,
        order_id: Uuid,
    ) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(payment)
    }

    async fn lock_payment_by_token(
        &self,
        tx: &mut Self::Tx,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE provider_payment_id = $1 FOR UPDATE",
        )
        .bind(provider_payment_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(payment)
    }

    async fn set_payment_status(
        &self,
        tx: &mut Self::Tx,
        payment_id: Uuid,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE payments SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(payment_id)
            .bind(status)
            .bind(at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn claim_webhook(
        &self,
        tx: &mut Self::Tx,
        event: &WebhookEvent,
    ) -> Result<bool, StoreError> {
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_events
                (id, idempotency_key, provider, provider_event_id, raw_payload, received_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event.id)
        .bind(&event.idempotency_key)
        .bind(&event.provider)
        .bind(&event.provider_event_id)
        .bind(&event.raw_payload)
        .bind(event.received_at)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(claimed.is_some())
    }

    async fn count_tickets(&self, tx: &mut Self::Tx, order_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE order_id = $1")
            .bind(order_id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(count)
    }

    async fn insert_tickets(&self, tx: &mut Self::Tx, tickets: &[Ticket]) -> Result<(), StoreError> {
        if tickets.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO tickets (id, order_id, event_id, ticket_type_id, scan_token, status, issued_at, used_at) ",
        );
        builder.push_values(tickets, |mut row, ticket| {
            row.push_bind(ticket.id)
                .push_bind(ticket.order_id)
                .push_bind(ticket.event_id)
                .push_bind(ticket.ticket_type_id)
                .push_bind(&ticket.scan_token)
                .push_bind(ticket.status)
                .push_bind(ticket.issued_at)
                .push_bind(ticket.used_at);
        });
        builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(|e| on_unique(e, "ticket"))?;
        Ok(())
    }

    async fn tickets_for_buyer(
        &self,
        tx: &mut Self::Tx,
        buyer_id: Uuid,
    ) -> Result<Vec<Ticket>, StoreError> {
        let tickets = sqlx::query_as::<_, Ticket>(
            r#"
            SELECT t.*
            FROM tickets t
            JOIN orders o ON o.id = t.order_id
            WHERE o.buyer_id = $1
              AND o.status = 'paid'
            ORDER BY t.issued_at, t.id
            "#,
        )
        .bind(buyer_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(tickets)
    }

    async fn lock_ticket_by_token(
        &self,
        tx: &mut Self::Tx,
        scan_token: &str,
    ) -> Result<Option<Ticket>, StoreError> {
        let ticket = sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets WHERE scan_token = $1 FOR UPDATE",
        )
        .bind(scan_token)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(ticket)
    }

    async fn mark_ticket_used(
        &self,
        tx: &mut Self::Tx,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE tickets SET status = $2, used_at = $3 WHERE id = $1")
            .bind(ticket_id)
            .bind(TicketStatus::Used)
            .bind(at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn events_due_for_payout(
        &self,
        tx: &mut Self::Tx,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT s.event_id
            FROM event_sessions s
            GROUP BY s.event_id
            HAVING MAX(COALESCE(s.end_at, s.start_at)) < $1
               AND NOT EXISTS (SELECT 1 FROM payout_plans p WHERE p.event_id = s.event_id)
            ORDER BY s.event_id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut **tx)
        .await?;
        Ok(ids)
    }

    async fn insert_payout_plan(
        &self,
        tx: &mut Self::Tx,
        plan: &PayoutPlan,
    ) -> Result<bool, StoreError> {
        // Another scheduler instance may have planned the event already.
        let result = sqlx::query(
            r#"
            INSERT INTO payout_plans (id, event_id, status, scheduled_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(plan.id)
        .bind(plan.event_id)
        .bind(plan.status)
        .bind(plan.scheduled_at)
        .bind(plan.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn due_payout_plans(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<PayoutPlan>, StoreError> {
        let plans = sqlx::query_as::<_, PayoutPlan>(
            r#"
            SELECT * FROM payout_plans
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at
            "#,
        )
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;
        Ok(plans)
    }

    async fn paid_gross(&self, tx: &mut Self::Tx, event_id: Uuid) -> Result<BigDecimal, StoreError> {
        let gross: BigDecimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_amount), 0)::NUMERIC FROM orders WHERE event_id = $1 AND status = 'paid'",
        )
        .bind(event_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(gross)
    }

    async fn complete_payout_plan(
        &self,
        tx: &mut Self::Tx,
        plan_id: Uuid,
        amounts: &PayoutAmounts,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payout_plans
            SET gross_amount = $2,
                commission_amount = $3,
                vat_amount = $4,
                net_amount = $5,
                status = 'processed',
                processed_at = $6
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(plan_id)
        .bind(&amounts.gross)
        .bind(&amounts.commission)
        .bind(&amounts.vat)
        .bind(&amounts.net)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
