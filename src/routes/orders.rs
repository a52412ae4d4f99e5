//! Order lookup.
//!
//! GET /orders/{id} - order with its lines and payment status

use axum::extract::Path;
use axum::routing::get;
use axum::{Extension, Json, Router};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::AppError;
use crate::models::OrderDetails;
use crate::state::AppState;
use crate::store::PipelineStore;

pub fn router<S: PipelineStore>() -> Router {
    Router::new().route("/orders/{id}", get(get_order::<S>))
}

/// Retrieve one of the caller's orders. Orders of other buyers are reported
/// as not found.
async fn get_order<S: PipelineStore>(
    Extension(state): Extension<AppState<S>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetails>, AppError> {
    let store = state.store.as_ref();
    let mut tx = store.begin().await?;

    let order = store
        .find_order(&mut tx, id)
        .await?
        .filter(|o| o.buyer_id == caller.user_id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;
    let items = store.order_items(&mut tx, id).await?;
    let payment_status = store
        .find_payment_for_order(&mut tx, id)
        .await?
        .map(|p| p.status);

    Ok(Json(OrderDetails {
        order,
        items,
        payment_status,
    }))
}
