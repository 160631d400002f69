//! HTTP surface of the help desk.

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/requests",
            get(handlers::list_requests).post(handlers::submit_question),
        )
        .route("/requests/:id", get(handlers::get_request))
        .route("/requests/:id/status", post(handlers::set_status))
        .route("/requests/:id/reassign", post(handlers::reassign_request))
        .route(
            "/requests/:id/notifications",
            get(handlers::notifications_for),
        )
        .route("/notifications", get(handlers::recent_notifications))
        .route("/statistics", get(handlers::statistics))
        .route("/supervisors", get(handlers::supervisors))
        .with_state(state)
}
