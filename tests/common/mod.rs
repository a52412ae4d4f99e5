//! Shared harness: the full router over a seeded `MemoryStore`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use ticketing_pipeline::config::PaymentsConfig;
use ticketing_pipeline::create_app;
use ticketing_pipeline::models::{Event, TicketType, WebhookPayload};
use ticketing_pipeline::signature;
use ticketing_pipeline::state::AppState;
use ticketing_pipeline::store::MemoryStore;

pub const SECRET: &str = "sandbox-secret";

pub struct TestApp {
    pub app: Router,
    pub store: MemoryStore,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
}

/// One event with one ticket type priced `price`, holding `capacity` units.
/// The sandbox provider route is mounted.
pub async fn spawn_app(price: i64, capacity: i32) -> TestApp {
    let payments = PaymentsConfig {
        sandbox_enabled: true,
        ..PaymentsConfig::default()
    };
    spawn_app_with(price, capacity, payments).await
}

pub async fn spawn_app_with(price: i64, capacity: i32, payments: PaymentsConfig) -> TestApp {
    let store = MemoryStore::new();
    let now = Utc::now();
    let event_id = Uuid::new_v4();
    store
        .seed_event(Event {
            id: event_id,
            organizer_id: Uuid::new_v4(),
            title: "Harbor Festival".to_string(),
            created_at: now,
        })
        .await;
    let ticket_type_id = Uuid::new_v4();
    store
        .seed_ticket_type(TicketType {
            id: ticket_type_id,
            event_id,
            name: "General".to_string(),
            price: BigDecimal::from(price),
            capacity,
            per_person_limit: 100,
            sales_start: now - Duration::days(1),
            sales_end: now + Duration::days(30),
        })
        .await;

    let app = create_app(AppState::new(Arc::new(store.clone()), payments));
    TestApp {
        app,
        store,
        event_id,
        ticket_type_id,
    }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// POST /checkout for `buyer`; returns status and body.
    pub async fn checkout(&self, buyer: Uuid, quantity: i64) -> (StatusCode, Value) {
        let body = serde_json::json!({
            "event_id": self.event_id,
            "items": [{ "ticket_type_id": self.ticket_type_id, "quantity": quantity }],
        });
        self.send(post_json("/checkout", Some((buyer, "buyer")), &body)).await
    }

    pub async fn deliver(&self, event_type: &str, token: &str, key: &str) -> (StatusCode, Value) {
        self.send(signed_webhook(event_type, token, key)).await
    }
}

pub fn post_json(uri: &str, caller: Option<(Uuid, &str)>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some((id, roles)) = caller {
        builder = builder
            .header("x-user-id", id.to_string())
            .header("x-user-roles", roles);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_as(uri: &str, caller: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(id) = caller {
        builder = builder.header("x-user-id", id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

pub fn payload(event_type: &str, token: &str) -> WebhookPayload {
    WebhookPayload {
        event_type: event_type.to_string(),
        payment_id: token.to_string(),
        order_id: None,
        amount: None,
        currency: Some("TRY".to_string()),
    }
}

/// Provider notification signed with [`SECRET`].
pub fn signed_webhook(event_type: &str, token: &str, key: &str) -> Request<Body> {
    let payload = payload(event_type, token);
    let sig = signature::sign(SECRET, &signature::canonical_bytes(&payload));
    webhook_request(&serde_json::to_vec(&payload).unwrap(), Some(&sig), Some(key))
}

pub fn webhook_request(body: &[u8], sig: Option<&str>, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments/webhook")
        .header("content-type", "application/json");
    if let Some(sig) = sig {
        builder = builder.header("x-signature", sig);
    }
    if let Some(key) = key {
        builder = builder.header("x-idempotency-key", key);
    }
    builder.body(Body::from(body.to_vec())).unwrap()
}

pub fn decimal(value: &Value) -> BigDecimal {
    value.as_str().unwrap().parse().unwrap()
}
