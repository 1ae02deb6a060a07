//! Control surface.

pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Build the dashboard-facing router.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/queues/status", get(routes::queues_status))
        .route("/queues/control", post(routes::queues_control))
        .route("/queues/price", post(routes::price_control))
        .route(
            "/strategies/config",
            get(routes::get_strategies_config).post(routes::update_strategy_config),
        )
        .route("/strategies/status", get(routes::strategies_status))
        .route("/markets", get(routes::list_markets))
        .route("/logs/requests", get(routes::recent_request_logs))
        .layer(CorsLayer::permissive())
        .with_state(AppState { engine })
}
