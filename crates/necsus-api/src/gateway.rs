use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
};

use necsus_gateway::connection;
use necsus_types::api::StreamQuery;

use crate::state::AppState;

/// `GET /ws/{room}?since=N`: a read-only stream of the room's events after message `N`.
/// The room name may contain `/`.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let since = query.since_id();
    let broker = state.broker().clone();
    let store = state.store();

    ws.on_upgrade(move |socket| connection::handle_connection(socket, broker, store, room, since))
}
