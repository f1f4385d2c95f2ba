//! HTTP routes for the relay
//!
//! This module defines all HTTP endpoints exposed by the relay. Anything not
//! matched here is served from the static page directory.

pub mod chat;
pub mod health;
pub mod metrics;
pub mod models;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/api/models", get(models::list_models))
        .route("/api/chat", post(chat::chat));

    // Public routes (health checks, metrics)
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics));

    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
