//! Error types for the pipeline and their HTTP mapping.
//!
//! Services return typed errors; [`AppError`] is the only type that knows
//! about status codes. Infrastructure failures are logged here and reach the
//! client as a generic 500 body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

/// Failures of a [`crate::store::PipelineStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A uniqueness or foreign-key rule was violated.
    #[error("store conflict: {0}")]
    Conflict(String),

    /// A row references something that is not there.
    #[error("inconsistent store state: {0}")]
    Corrupt(String),
}

/// Reasons a checkout is refused. Nothing is persisted for any of them.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("event {0} not found")]
    EventNotFound(Uuid),

    #[error("cart has no items")]
    EmptyCart,

    #[error("ticket type {0} does not belong to the event")]
    InvalidTicketType(Uuid),

    #[error("quantity for ticket type {0} must be positive")]
    NonPositiveQuantity(Uuid),

    #[error("ticket type {0} is not on sale")]
    SalesClosed(Uuid),

    #[error("ticket type {ticket_type_id}: limit is {limit} per person, already holding {held}, requested {requested}")]
    PerPersonLimitExceeded {
        ticket_type_id: Uuid,
        limit: i64,
        held: i64,
        requested: i64,
    },

    #[error("not enough capacity for ticket type {ticket_type_id}: requested {requested}, available {available}")]
    CapacityExceeded {
        ticket_type_id: Uuid,
        requested: i64,
        available: i64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reasons an inbound provider notification is refused.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing signature or idempotency key")]
    MissingHeaders,

    #[error("idempotency key too long")]
    IdempotencyKeyTooLong,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("payment {0} not found")]
    PaymentNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reasons a door scan is refused.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scan_token required")]
    MissingToken,

    #[error("unknown scan token")]
    NotFound,

    #[error("ticket already used")]
    AlreadyUsed,

    #[error("ticket was refunded")]
    Refunded,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
}

/// HTTP-facing error.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] StoreError),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            Self::Internal(source) => {
                // Request span carries route and correlation id.
                error!(error = %source, "request failed on infrastructure error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { message, code })).into_response()
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::EventNotFound(_) => Self::NotFound(err.to_string()),
            CheckoutError::EmptyCart
            | CheckoutError::InvalidTicketType(_)
            | CheckoutError::NonPositiveQuantity(_)
            | CheckoutError::SalesClosed(_) => Self::BadRequest(err.to_string()),
            CheckoutError::PerPersonLimitExceeded { .. } | CheckoutError::CapacityExceeded { .. } => {
                Self::Conflict(err.to_string())
            }
            CheckoutError::Store(source) => Self::Internal(source),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MissingHeaders | WebhookError::InvalidSignature => {
                Self::Unauthorized(err.to_string())
            }
            WebhookError::IdempotencyKeyTooLong | WebhookError::MalformedPayload(_) => {
                Self::BadRequest(err.to_string())
            }
            WebhookError::PaymentNotFound(_) => Self::NotFound(err.to_string()),
            WebhookError::Store(source) => Self::Internal(source),
        }
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::MissingToken => Self::BadRequest(err.to_string()),
            ScanError::NotFound => Self::NotFound(err.to_string()),
            ScanError::AlreadyUsed | ScanError::Refunded => Self::Conflict(err.to_string()),
            ScanError::Store(source) => Self::Internal(source),
        }
    }
}
