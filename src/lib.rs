//! # Ticketing Pipeline
//!
//! Order -> payment -> ticket issuance backend for event ticketing.
//!
//! Exposes the Axum router and modules so integration tests can drive the
//! whole pipeline in-process against [`store::MemoryStore`].

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod signature;
pub mod state;
pub mod store;
pub mod telemetry;

use axum::{middleware, Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::store::PipelineStore;

/// Build the Axum router with all route modules and middleware.
///
/// The caller provides the store backend. This function does NOT start a
/// server or the settlement scheduler.
pub fn create_app<S: PipelineStore>(state: AppState<S>) -> Router {
    let sandbox_enabled = state.payments.sandbox_enabled;
    Router::new()
        .merge(routes::checkout::router::<S>())
        .merge(routes::payments::router::<S>(sandbox_enabled))
        .merge(routes::orders::router::<S>())
        .merge(routes::tickets::router::<S>())
        .merge(routes::health::router())
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http().make_span_with(telemetry::make_span))
        .layer(middleware::from_fn(telemetry::request_id))
        .layer(CorsLayer::permissive())
}
