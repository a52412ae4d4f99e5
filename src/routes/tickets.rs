//! Ticket routes.
//!
//! GET  /tickets/mine  - the caller's tickets on paid orders, oldest first
//! POST /checkin/scan  - redeem a scan token (organizers and admins)

use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;

use crate::auth::Caller;
use crate::error::AppError;
use crate::handlers::checkin;
use crate::models::{ScanRequest, ScanResponse, TicketView};
use crate::state::AppState;
use crate::store::PipelineStore;

pub fn router<S: PipelineStore>() -> Router {
    Router::new()
        .route("/tickets/mine", get(my_tickets::<S>))
        .route("/checkin/scan", post(scan::<S>))
}

async fn my_tickets<S: PipelineStore>(
    Extension(state): Extension<AppState<S>>,
    caller: Caller,
) -> Result<Json<Vec<TicketView>>, AppError> {
    let store = state.store.as_ref();
    let mut tx = store.begin().await?;
    let tickets = store.tickets_for_buyer(&mut tx, caller.user_id).await?;
    Ok(Json(tickets.into_iter().map(TicketView::from).collect()))
}

async fn scan<S: PipelineStore>(
    Extension(state): Extension<AppState<S>>,
    caller: Caller,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, AppError> {
    if !caller.can_check_in() {
        return Err(AppError::Forbidden("check-in requires the organizer role".into()));
    }
    let response = checkin::scan(state.store.as_ref(), &req.scan_token, Utc::now()).await?;
    Ok(Json(response))
}
