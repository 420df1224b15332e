use axum::{Json, extract::State, extract::rejection::JsonRejection};

use necsus_types::api::{RoomRequest, RoomResponse};

use crate::error::{ApiError, json_body, required};
use crate::state::AppState;

pub async fn clear_room_messages(
    State(state): State<AppState>,
    body: Result<Json<RoomRequest>, JsonRejection>,
) -> Result<Json<RoomResponse>, ApiError> {
    let req = json_body(body)?;
    let room = required(req.room, "Need to provide the room name to clear the messages.")?;

    let room = state.dispatcher.clear_room_messages(&room).await?;
    Ok(Json(RoomResponse { room }))
}

/// Release a room's conversation pin. Meant for debugging bots.
pub async fn clear_room_state(
    State(state): State<AppState>,
    body: Result<Json<RoomRequest>, JsonRejection>,
) -> Result<Json<RoomResponse>, ApiError> {
    let req = json_body(body)?;
    let room = required(req.room, "Need to provide the room name to clear the state of.")?;

    state.dispatcher.clear_room_state(&room).await?;
    Ok(Json(RoomResponse { room }))
}
