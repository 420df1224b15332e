//! HTTP and WebSocket surface of the relay.

pub mod bots;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// All routes, with CORS, access logging and `Cache-Control: no-cache` applied.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/messages", get(messages::get_messages))
        .route("/api/bots", get(bots::get_bots))
        .route("/api/actions/message", post(messages::post_message))
        .route("/api/actions/message-form", post(messages::post_message_form))
        .route("/api/actions/bot", post(bots::put_bot).delete(bots::delete_bot))
        .route("/api/actions/clear-room-messages", post(rooms::clear_room_messages))
        .route("/api/actions/clear-room-state", post(rooms::clear_room_state));

    let ws_route = Router::new().route("/ws/{*room}", get(gateway::ws_upgrade));

    Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::no_cache))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
