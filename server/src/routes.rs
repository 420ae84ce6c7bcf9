use axum::Router;

use crate::chat::{colors, presence};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (identity negotiated in-band, no auth)
    let ws_routes = Router::new()
        .route("/", axum::routing::get(ws_handler::ws_upgrade))
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Read-only views of the registry
    let public_routes = Router::new()
        .route("/colors", axum::routing::get(colors::get_available_colors))
        .route("/presence", axum::routing::get(presence::get_presence));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(public_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
