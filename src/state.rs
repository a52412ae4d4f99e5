//! Shared request state.

use std::sync::Arc;

use crate::config::PaymentsConfig;

/// Handed to every route through an `Extension` layer.
pub struct AppState<S> {
    pub store: Arc<S>,
    pub payments: Arc<PaymentsConfig>,
}

impl<S> AppState<S> {
    pub fn new(store: Arc<S>, payments: PaymentsConfig) -> Self {
        Self {
            store,
            payments: Arc::new(payments),
        }
    }
}

// Manual impl: `S` itself need not be `Clone`.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            payments: Arc::clone(&self.payments),
        }
    }
}
