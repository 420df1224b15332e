use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Query, State},
};
use serde_json::{Value, json};

use necsus_types::api::{MessageFormRequest, MessagesQuery, PostMessageRequest};
use necsus_types::models::Message;

use crate::error::{ApiError, blocking, json_body, query_params, required};
use crate::state::AppState;

/// List a room's messages with ids strictly greater than `since`.
pub async fn get_messages(
    State(state): State<AppState>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let query = query_params(query)?;
    let since = query.since_id();
    let room = required(query.room, "The room name is required.")?;

    let store = state.store();
    let messages = blocking(move || store.messages_since(&room, since)).await?;

    Ok(Json(messages))
}

/// Post a human message to a room. Responds with the stored message once every
/// triggered bot has replied or failed.
pub async fn post_message(
    State(state): State<AppState>,
    body: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    let req = json_body(body)?;

    let (Some(room), Some(author), Some(text)) = (req.room, req.author, req.text) else {
        return Err(ApiError::bad_request("All of text, room, and author should be non-null."));
    };

    let message = state
        .dispatcher
        .post_message(&room, &author, &text, req.attachments)
        .await?;

    Ok(Json(message))
}

/// A viewer submitted a form from a bot message; pass it back to the bot.
pub async fn post_message_form(
    State(state): State<AppState>,
    body: Result<Json<MessageFormRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(body)?;

    let (Some(room), Some(author), Some(bot_id), Some(form_data)) = (req.room, req.author, req.bot_id, req.form_data)
    else {
        return Err(ApiError::bad_request(
            "All of room, author, bot_id, and form_data should be non-null.",
        ));
    };

    state
        .dispatcher
        .post_form_callback(&room, &author, bot_id, req.action_url.as_deref(), form_data)
        .await?;

    Ok(Json(json!({})))
}
