use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use anchorchat_types::api::{DirectConversationRequest, DirectConversationResponse, SendMessageRequest};
use anchorchat_types::models::ChatMessage;

use crate::error::Error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<u32>,
    /// Pass the `seq` of the oldest message from the previous page to fetch
    /// older messages.
    pub before: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessageEntry {
    pub seq: i64,
    #[serde(flatten)]
    pub message: ChatMessage,
}

pub async fn get_or_create_direct(
    State(state): State<AppState>,
    Json(req): Json<DirectConversationRequest>,
) -> Result<impl IntoResponse, Error> {
    let conversation_id = state.session.get_or_create_direct(req.peer_id).await?;
    Ok(Json(DirectConversationResponse { conversation_id }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, Error> {
    let message = state.session.send(conversation_id, &req.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, Error> {
    let entries: Vec<MessageEntry> = state
        .session
        .history(conversation_id, query.limit, query.before)
        .await?
        .into_iter()
        .map(|(seq, message)| MessageEntry { seq, message })
        .collect();
    Ok(Json(entries))
}
