use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use alcove_types::api::{CreateRoomRequest, RoomResponse};
use alcove_types::models::PresenceEntry;

use crate::AppState;
use crate::middleware::Claims;

pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let room_id = Uuid::new_v4();
    let now = Utc::now();

    let db = state.clone();
    let room_name = name.clone();
    let creator = claims.sub.to_string();
    tokio::task::spawn_blocking(move || {
        db.db
            .create_room(&room_id.to_string(), &room_name, &now.to_rfc3339())?;
        // The creator joins their own room
        db.db
            .add_room_member(&room_id.to_string(), &creator, &now.to_rfc3339())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(RoomResponse {
            id: room_id,
            name,
            created_at: now,
            last_message: None,
            last_message_at: None,
        }),
    ))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let user_id = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.list_rooms_for_user(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let rooms: Vec<RoomResponse> = rows
        .into_iter()
        .map(|row| RoomResponse {
            id: parse_id_lossy(&row.id, "room"),
            name: row.name,
            created_at: parse_timestamp_lossy(&row.created_at, &row.id),
            last_message: row.last_message,
            last_message_at: row
                .last_message_at
                .as_deref()
                .map(|raw| parse_timestamp_lossy(raw, &row.id)),
        })
        .collect();

    Ok(Json(rooms))
}

pub async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let rid = room_id.to_string();
    let user_id = claims.sub.to_string();
    let joined = tokio::task::spawn_blocking(move || {
        if !db.db.room_exists(&rid)? {
            return Ok(false);
        }
        db.db
            .add_room_member(&rid, &user_id, &Utc::now().to_rfc3339())?;
        Ok::<_, anyhow::Error>(true)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !joined {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Who is connected to the room right now.
pub async fn room_presence(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Json<Vec<PresenceEntry>> {
    Json(state.hub.presence(room_id))
}

pub(crate) fn parse_id_lossy(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp_lossy(raw: &str, context_id: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on '{}': {}", raw, context_id, e);
            DateTime::default()
        })
}
