use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use alcove_types::api::{MessageResponse, SendMessageRequest};
use alcove_types::models::Message;

use crate::AppState;
use crate::middleware::Claims;
use crate::rooms::{parse_id_lossy, parse_timestamp_lossy};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

const MAX_MESSAGE_LEN: usize = 4000;

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = req.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_MESSAGE_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let message = Message {
        id: Uuid::new_v4(),
        room_id,
        sender_id: claims.sub,
        content,
        created_at: chrono::Utc::now(),
    };

    // Run membership check and insert off the async runtime
    let db = state.clone();
    let insert = message.clone();
    let allowed = tokio::task::spawn_blocking(move || {
        if !db
            .db
            .is_room_member(&insert.room_id.to_string(), &insert.sender_id.to_string())?
        {
            return Ok(false);
        }
        db.db.insert_message(
            &insert.id.to_string(),
            &insert.room_id.to_string(),
            &insert.sender_id.to_string(),
            &insert.content,
            &insert.created_at.to_rfc3339(),
        )?;
        Ok::<_, anyhow::Error>(true)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !allowed {
        return Err(StatusCode::FORBIDDEN);
    }

    // Fan out to everyone watching the room
    state.hub.publish_message(&message, &claims.username);

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: message.id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            sender_username: claims.username.clone(),
            content: message.content,
            created_at: message.created_at,
        }),
    ))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let rid = room_id.to_string();
    let user_id = claims.sub.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || {
        if !db
            .db
            .is_room_member(&rid, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }
        db.db
            .get_messages(&rid, limit, before.as_deref())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .map(|row| MessageResponse {
            id: parse_id_lossy(&row.id, "message"),
            room_id: parse_id_lossy(&row.room_id, "room"),
            sender_id: parse_id_lossy(&row.sender_id, "sender"),
            sender_username: row.sender_username,
            content: row.content,
            created_at: parse_timestamp_lossy(&row.created_at, &row.id),
        })
        .collect();

    Ok(Json(messages))
}
