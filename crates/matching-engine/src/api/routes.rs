//! HTTP routes for the matching engine API

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::*;
use crate::exchange::Exchange;

/// Create the matching engine router
///
/// Routes:
/// - POST   /api/v1/orders                - Submit order
/// - DELETE /api/v1/orders/:order_id      - Cancel order
/// - GET    /api/v1/books/:pair?depth=    - Book snapshot
/// - GET    /api/v1/trades/:pair?limit=   - Recent trades
/// - GET    /api/v1/metrics               - Engine metrics
/// - POST   /api/v1/settlement/finality   - Advance settlement finality
/// - GET    /health                       - Health check
pub fn create_router(exchange: Arc<Exchange>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/orders", post(submit_order))
        .route("/api/v1/orders/:order_id", delete(cancel_order))
        .route("/api/v1/books/:pair", get(get_order_book))
        .route("/api/v1/trades/:pair", get(get_trades))
        .route("/api/v1/metrics", get(get_metrics))
        .route("/api/v1/settlement/finality", post(set_finality))
        .layer(TraceLayer::new_for_http())
        .with_state(ApiState { exchange })
}
