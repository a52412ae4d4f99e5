//! HTTP route modules.
//!
//! - `checkout`: `POST /checkout`
//! - `payments`: provider webhook and the sandbox completion endpoint
//! - `orders`: `GET /orders/{id}` for the buyer who placed the order
//! - `tickets`: the caller's tickets and door check-in
//! - `health`: liveness probe
//!
//! Every router is generic over the store backend and reads
//! [`crate::state::AppState`] from an `Extension`.

pub mod checkout;
pub mod health;
pub mod orders;
pub mod payments;
pub mod tickets;
