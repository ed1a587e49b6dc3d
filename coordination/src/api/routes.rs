use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::engine::SharedEngine;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
}

impl AppState {
    pub fn new(engine: SharedEngine) -> Self {
        Self { engine }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Coordination
        .route("/coordinate", post(handlers::coordinate))
        .route("/consensus", get(handlers::consensus))
        .route("/health", get(handlers::health))
        // Agents
        .route("/agents/register", post(handlers::register_agent))
        .route("/agents/deregister", post(handlers::deregister_agent))
        // Work items
        .route("/work-items", post(handlers::enqueue_work_item))
        .route("/work-items/:id/cancel", post(handlers::cancel_work_item))
        // Traces
        .route("/traces", get(handlers::list_traces))
        .route("/traces/:work_item_id", get(handlers::get_trace))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
