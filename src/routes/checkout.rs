//! Checkout route.
//!
//! POST /checkout - admit a cart and open a pending order with its payment

use axum::routing::post;
use axum::{Extension, Json, Router};
use chrono::Utc;

use crate::auth::Caller;
use crate::error::AppError;
use crate::handlers::checkout::admit;
use crate::models::{CheckoutRequest, CheckoutResponse};
use crate::state::AppState;
use crate::store::PipelineStore;

pub fn router<S: PipelineStore>() -> Router {
    Router::new().route("/checkout", post(create_checkout::<S>))
}

/// Reserve the requested units for the caller.
///
/// The response carries the provider token and the redirect URL the client
/// follows to complete payment; tickets appear once the provider confirms.
async fn create_checkout<S: PipelineStore>(
    Extension(state): Extension<AppState<S>>,
    caller: Caller,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let response = admit(
        state.store.as_ref(),
        &state.payments,
        caller.user_id,
        &req,
        Utc::now(),
    )
    .await?;
    Ok(Json(response))
}
