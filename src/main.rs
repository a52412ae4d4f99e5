//! # Ticketing Pipeline
//!
//! Standalone Axum service for checkout, payment notifications, ticket
//! issuance and organizer settlement.
//!
//! ## Architecture
//!
//! - Axum handles HTTP routing and request/response lifecycle
//! - SQLx manages the `PostgreSQL` store (or an in-process store for local runs)
//! - The settlement scheduler runs in the background on a fixed interval

use std::sync::Arc;

use anyhow::Context;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use ticketing_pipeline::config::{Config, StorageBackend};
use ticketing_pipeline::handlers::settlement::SettlementScheduler;
use ticketing_pipeline::models::{Event, EventSession, TicketType};
use ticketing_pipeline::state::AppState;
use ticketing_pipeline::store::{MemoryStore, PgStore, PipelineStore};
use ticketing_pipeline::{create_app, db, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    telemetry::init_tracing(&config.log);

    info!("Starting ticketing pipeline");

    match config.server.storage {
        StorageBackend::Postgres => {
            let pool = db::connect(&config.database)
                .await
                .context("connecting to the application database")?;
            info!("Connected to application database; migrations complete");
            serve(Arc::new(PgStore::new(pool)), config).await
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory store; all state is lost on restart");
            let store = MemoryStore::new();
            seed_demo_catalog(&store).await;
            serve(Arc::new(store), config).await
        }
    }
}

async fn serve<S: PipelineStore>(store: Arc<S>, config: Config) -> anyhow::Result<()> {
    let scheduler = SettlementScheduler::new(Arc::clone(&store), config.settlement.clone()).spawn();

    if config.payments.sandbox_enabled {
        warn!("Sandbox payment completion is enabled; orders can be paid without a provider");
    }
    let app = create_app(AppState::new(store, config.payments.clone()));

    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    info!("Listening on {}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// The in-memory store has no catalog behind it; give local runs something
/// to buy.
async fn seed_demo_catalog(store: &MemoryStore) {
    let now = Utc::now();
    let event_id = Uuid::new_v4();
    store
        .seed_event(Event {
            id: event_id,
            organizer_id: Uuid::new_v4(),
            title: "Demo Night".to_string(),
            created_at: now,
        })
        .await;
    store
        .seed_session(EventSession {
            id: Uuid::new_v4(),
            event_id,
            start_at: now + Duration::days(14),
            end_at: Some(now + Duration::days(14) + Duration::hours(4)),
        })
        .await;
    let ticket_type_id = Uuid::new_v4();
    store
        .seed_ticket_type(TicketType {
            id: ticket_type_id,
            event_id,
            name: "General Admission".to_string(),
            price: BigDecimal::from(100),
            capacity: 100,
            per_person_limit: 10,
            sales_start: now - Duration::days(1),
            sales_end: now + Duration::days(14),
        })
        .await;
    info!("Demo catalog: event {} ticket type {}", event_id, ticket_type_id);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
