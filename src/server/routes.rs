//! Router configuration for the web server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/views", get(handlers::views))
        // Watch list
        .route("/watched", get(handlers::list_watched))
        .route(
            "/watched/:username",
            post(handlers::add_watched).delete(handlers::remove_watched),
        )
        // Operator controls
        .route("/refresh", post(handlers::refresh))
        .route("/challenge/resolve", post(handlers::resolve_challenge))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
