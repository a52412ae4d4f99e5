//! HMAC-SHA256 signatures for provider notifications.
//!
//! The signed bytes are the canonical serialization of [`WebhookPayload`]:
//! `serde_json::to_vec` of the typed struct, fields in declaration order,
//! absent optionals as `null` and amounts as decimal strings. The provider
//! and this service both sign that form, so whitespace or key order in the
//! transported body does not matter.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::WebhookPayload;

type HmacSha256 = Hmac<Sha256>;

pub fn canonical_bytes(payload: &WebhookPayload) -> Vec<u8> {
    // Serializing plain strings and decimals cannot fail.
    serde_json::to_vec(payload).unwrap_or_default()
}

// HMAC accepts keys of any length, so this is always `Some`.
fn keyed(secret: &str) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).ok()
}

/// Lowercase hex signature of `bytes`.
pub fn sign(secret: &str, bytes: &[u8]) -> String {
    keyed(secret)
        .map(|mut mac| {
            mac.update(bytes);
            hex::encode(mac.finalize().into_bytes())
        })
        .unwrap_or_default()
}

/// Check a hex signature header in constant time. Hex case is ignored.
pub fn verify(secret: &str, bytes: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Some(mut mac) = keyed(secret) else {
        return false;
    };
    mac.update(bytes);
    mac.verify_slice(&expected).is_ok()
}
