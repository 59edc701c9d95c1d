use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use alcove_digest::DigestError;
use alcove_digest::notifier::is_valid_push_token;
use alcove_digest::store::{DigestHistoryStore, SettingsStore};
use alcove_digest::topics::AVAILABLE_TOPICS;
use alcove_types::api::{
    DigestResponse, DigestSettingsResponse, RegisterPushTokenRequest, SaveDigestSettingsRequest,
    TestDigestRequest, TestDigestResponse,
};
use alcove_types::models::{DigestUserConfig, MAX_DIGEST_TOPICS};

use crate::AppState;
use crate::middleware::Claims;

pub async fn get_topics() -> impl IntoResponse {
    Json(AVAILABLE_TOPICS)
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let settings = SettingsStore::get(state.db.as_ref(), claims.sub).map_err(|e| {
        error!("loading digest settings: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(settings.map(DigestSettingsResponse::from)))
}

pub async fn save_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SaveDigestSettingsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let delivery_time_utc = req
        .delivery_time_utc
        .parse()
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    if req.topics.is_empty() || req.topics.len() > MAX_DIGEST_TOPICS {
        return Err(StatusCode::BAD_REQUEST);
    }

    let config = DigestUserConfig {
        user_id: claims.sub,
        delivery_time_utc,
        topics: req.topics,
        custom_prompt: req.custom_prompt.filter(|p| !p.trim().is_empty()),
        enabled: req.enabled,
        // Token registration is a separate flow; the store preserves any
        // token already on file.
        notification_token: None,
        updated_at: Utc::now(),
    };

    state.db.upsert(&config).map_err(|e| {
        error!("saving digest settings: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let saved = SettingsStore::get(state.db.as_ref(), claims.sub)
        .map_err(|e| {
            error!("reloading digest settings: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(DigestSettingsResponse::from(saved)))
}

pub async fn register_push_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterPushTokenRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_push_token(&req.token) {
        warn!("rejected malformed push token for user {}", claims.sub);
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .db
        .set_notification_token(claims.sub, &req.token)
        .map_err(|e| {
            error!("registering push token: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!("push token registered for user {}", claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    50
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let digests = state
        .db
        .list_for_user(claims.sub, query.limit.min(200))
        .map_err(|e| {
            error!("loading digest history: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(
        digests
            .into_iter()
            .map(DigestResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Fetching a digest marks it read — the flip is one-way and the first
/// `read_at` sticks.
pub async fn get_digest(
    State(state): State<AppState>,
    Path(digest_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let digest = DigestHistoryStore::get(state.db.as_ref(), digest_id)
        .map_err(|e| {
            error!("loading digest {digest_id}: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    if digest.user_id != claims.sub {
        return Err(StatusCode::NOT_FOUND);
    }

    let digest = state
        .db
        .mark_read(digest_id)
        .map_err(|e| {
            error!("marking digest {digest_id} read: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(DigestResponse::from(digest)))
}

pub async fn delete_digest(
    State(state): State<AppState>,
    Path(digest_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let digest = DigestHistoryStore::get(state.db.as_ref(), digest_id)
        .map_err(|e| {
            error!("loading digest {digest_id}: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    if digest.user_id != claims.sub {
        return Err(StatusCode::NOT_FOUND);
    }

    let deleted = state.db.delete(digest_id).map_err(|e| {
        error!("deleting digest {digest_id}: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Run generation now, without the schedule. Persists to history only when
/// asked; never sends a notification.
pub async fn test_digest(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TestDigestRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.topics.len() > MAX_DIGEST_TOPICS {
        return Err(StatusCode::BAD_REQUEST);
    }

    let result = state
        .scheduler
        .test_digest_generation(req.topics, req.custom_prompt, req.persist.then_some(claims.sub))
        .await
        .map_err(|e| {
            warn!("test digest generation failed for user {}: {}", claims.sub, e);
            digest_error_status(&e)
        })?;

    Ok(Json(TestDigestResponse {
        content: result.content,
        sources: result.sources,
        digest_id: result.digest_id,
    }))
}

/// On-demand bypass of the schedule: the full generate→persist→notify
/// sequence for the calling user.
pub async fn trigger_digest(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let digest = state
        .scheduler
        .trigger_manual_digest(claims.sub)
        .await
        .map_err(|e| {
            warn!("manual digest for user {} failed: {}", claims.sub, e);
            digest_error_status(&e)
        })?;
    Ok(Json(DigestResponse::from(digest)))
}

fn digest_error_status(e: &DigestError) -> StatusCode {
    match e {
        DigestError::ConfigNotFound => StatusCode::NOT_FOUND,
        DigestError::InvalidToken => StatusCode::BAD_REQUEST,
        DigestError::GenerationFailed(_) | DigestError::NotificationFailed(_) => {
            StatusCode::BAD_GATEWAY
        }
        DigestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
