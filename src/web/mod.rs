//! Web layer: the tracking-pixel endpoint, status listings and the
//! send endpoints, wired into one axum router.

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use handlers::{health, recipients, send, send_one, status, tracking_pixel, AppState};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/t/:token", get(handlers::tracking_pixel))
        .route("/api/status", get(handlers::status))
        .route("/api/recipients", get(handlers::recipients))
        .route("/api/send", post(handlers::send))
        .route("/api/send-one", post(handlers::send_one))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
