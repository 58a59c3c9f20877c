//! HTTP routes.

pub mod health;
pub mod prediction;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/prediction", prediction::router(state))
}
