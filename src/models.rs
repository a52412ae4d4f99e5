//! Domain models for the ticketing pipeline.
//!
//! Rows map to the tables created by `migrations/` and are shared by both
//! store backends. Catalog rows (`Event`, `EventSession`, `TicketType`) are
//! owned by the catalog subsystem and only read here.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Status enums (stored as lowercase TEXT)
// ============================================================================

/// Lifecycle of an order. Only `pending -> paid` is driven by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Canceled,
    Refunded,
}

impl OrderStatus {
    /// Whether units on an order in this status count against capacity.
    pub fn holds_inventory(self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }
}

/// Settlement status of a payment with the provider stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentStatus {
    /// Allowed moves of the payment state machine.
    ///
    /// `succeeded -> succeeded` is accepted so a re-delivered success can
    /// re-run issuance; `failed -> succeeded` lets a later capture recover
    /// an order that was left pending.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Succeeded)
                | (Self::Pending, Self::Failed)
                | (Self::Failed, Self::Succeeded)
                | (Self::Succeeded, Self::Succeeded)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Used,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processed,
}

// ============================================================================
// Catalog rows (read-only here)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventSession {
    pub id: Uuid,
    pub event_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
}

impl EventSession {
    /// A session without an end time is considered over once it starts.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end_at.unwrap_or(self.start_at)
    }
}

/// A purchasable admission category of an event.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub capacity: i32,
    pub per_person_limit: i32,
    pub sales_start: DateTime<Utc>,
    pub sales_end: DateTime<Utc>,
}

impl TicketType {
    /// Sales window is half-open: `[sales_start, sales_end)`.
    pub fn on_sale_at(&self, at: DateTime<Utc>) -> bool {
        self.sales_start <= at && at < self.sales_end
    }
}

// ============================================================================
// Pipeline rows
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub event_id: Uuid,
    pub currency: String,
    pub total_amount: BigDecimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One line of an order. `unit_price` is the catalog price at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub provider_payment_id: String,
    pub status: PaymentStatus,
    pub idempotency_key: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Replay ledger entry. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub idempotency_key: String,
    pub provider: String,
    pub provider_event_id: String,
    pub raw_payload: String,
    pub received_at: DateTime<Utc>,
}

/// An issued entry credential. `scan_token` is a bearer secret.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub scan_token: String,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PayoutPlan {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: PayoutStatus,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub gross_amount: Option<BigDecimal>,
    pub commission_amount: Option<BigDecimal>,
    pub vat_amount: Option<BigDecimal>,
    pub net_amount: Option<BigDecimal>,
}

/// The four figures written when a payout plan is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutAmounts {
    pub gross: BigDecimal,
    pub commission: BigDecimal,
    pub vat: BigDecimal,
    pub net: BigDecimal,
}

// ============================================================================
// Request Models (Deserialize from JSON input)
// ============================================================================

/// Request body for `POST /checkout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub event_id: Uuid,
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub ticket_type_id: Uuid,
    pub quantity: i64,
}

/// Notification body sent by the payment provider.
///
/// Field order is part of the signed canonical form; see [`crate::signature`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_type: String,
    pub payment_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Request body for the sandbox provider's completion endpoint.
#[derive(Debug, Deserialize)]
pub struct SandboxCompleteRequest {
    pub payment_token: String,
    pub outcome: SandboxOutcome,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub scan_token: String,
}

// ============================================================================
// Response Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub provider: String,
    pub payment_token: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Processed,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: WebhookStatus,
}

#[derive(Debug, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payment_status: Option<PaymentStatus>,
}

/// A ticket as shown in the buyer's ticket list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketView {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub scan_token: String,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl From<Ticket> for TicketView {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            event_id: ticket.event_id,
            ticket_type_id: ticket.ticket_type_id,
            scan_token: ticket.scan_token,
            status: ticket.status,
            issued_at: ticket.issued_at,
            used_at: ticket.used_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub status: String,
    pub ticket_id: Uuid,
    pub used_at: DateTime<Utc>,
}
