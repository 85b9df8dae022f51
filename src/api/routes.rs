//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, monitoring::metrics_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Pool queries and administration
        .route("/pool/init", post(init_pool_handler))
        .route("/pool/:currency", get(pool_handler))
        .route("/pool/:currency/seed", post(seed_pool_handler))
        .route("/pool/:currency/pause", post(pause_pool_handler))
        // Wager lifecycle
        .route("/calculate-odds", post(calculate_odds_handler))
        .route("/entry", post(create_entry_handler))
        .route("/entry/:entry_id", get(entry_handler))
        .route("/entry/:entry_id/retry-refund", post(retry_refund_handler))
        .route("/settle/:entry_id", post(settle_handler))
        .route("/recent-wins", get(recent_wins_handler))
        .with_state(state)
}
