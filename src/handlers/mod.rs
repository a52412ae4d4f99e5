//! Pipeline steps, independent of HTTP.
//!
//! - `checkout`: admit a cart, create the pending order and payment
//! - `webhook`: authenticate and deduplicate provider notifications
//! - `payment`: apply a notification to the payment/order pair
//! - `issuer`: materialize tickets for a paid order
//! - `settlement`: periodic payout plans for concluded events
//! - `checkin`: redeem a scan token at the door
//! - `sandbox`: the payment provider stand-in
//!
//! Every step is generic over [`crate::store::PipelineStore`] and does its
//! work inside one store transaction.

pub mod checkin;
pub mod checkout;
pub mod issuer;
pub mod payment;
pub mod sandbox;
pub mod settlement;
pub mod webhook;

use rand::rngs::OsRng;
use rand::RngCore;

/// Lowercase hex string carrying `bytes` bytes of OS randomness.
pub(crate) fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
