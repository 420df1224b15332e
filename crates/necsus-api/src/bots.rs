use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Query, State},
};
use tracing::info;

use necsus_types::api::{BotsQuery, DeleteBotRequest, PutBotRequest};
use necsus_types::models::{Bot, NewBot};

use crate::error::{ApiError, blocking, json_body, query_params, required};
use crate::state::AppState;

/// List the bots of one room, or of the whole server when no room is given.
pub async fn get_bots(
    State(state): State<AppState>,
    query: Result<Query<BotsQuery>, QueryRejection>,
) -> Result<Json<Vec<Bot>>, ApiError> {
    let query = query_params(query)?;

    let store = state.store();
    let bots = blocking(move || match query.room {
        Some(room) => store.bots_in_room(&room),
        None => store.all_bots(),
    })
    .await?;

    Ok(Json(bots))
}

/// Create a bot, or update the one with the given id.
pub async fn put_bot(
    State(state): State<AppState>,
    body: Result<Json<PutBotRequest>, JsonRejection>,
) -> Result<Json<Bot>, ApiError> {
    let req = json_body(body)?;
    let room = required(req.room, "Need to provide the room the bot belongs to.")?;
    let name = required(req.name, "Need to provide a name for the bot.")?;

    let bot = state
        .dispatcher
        .put_bot(NewBot {
            id: req.id,
            room,
            name,
            responds_to: req.responds_to,
            url: req.url,
        })
        .await?;

    info!("Saved bot {} ({:?}) in room {:?}", bot.id, bot.name, bot.room);
    Ok(Json(bot))
}

pub async fn delete_bot(
    State(state): State<AppState>,
    body: Result<Json<DeleteBotRequest>, JsonRejection>,
) -> Result<Json<Bot>, ApiError> {
    let req = json_body(body)?;
    let id = required(req.id, "Need to provide the ID of the bot to remove.")?;

    let bot = state.dispatcher.delete_bot(id).await?;

    info!("Deleted bot {} from room {:?}", bot.id, bot.room);
    Ok(Json(bot))
}
