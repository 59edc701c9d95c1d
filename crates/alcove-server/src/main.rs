use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use alcove_api::{AppState, AppStateInner, auth, digest, messages, middleware::require_auth, rooms};
use alcove_digest::generator::GeminiClient;
use alcove_digest::notifier::ExpoPushClient;
use alcove_digest::{DigestScheduler, SchedulerConfig};
use alcove_room::{RoomHub, RoomHubConfig, connection};
use alcove_store::Database;
use alcove_types::api::Claims;

/// Placeholder JWT secrets that MUST NOT be used outside development.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alcove=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("ALCOVE_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: ALCOVE_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let db_path = std::env::var("ALCOVE_DB_PATH").unwrap_or_else(|_| "alcove.db".into());
    let host = std::env::var("ALCOVE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ALCOVE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    if gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY is unset; digest generation will fail until it is configured");
    }
    let gemini_model =
        std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".into());
    let digest_language =
        std::env::var("ALCOVE_DIGEST_LANGUAGE").unwrap_or_else(|_| "English".into());

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Realtime hub
    let hub = RoomHub::new(RoomHubConfig::default());

    // Digest scheduler with its collaborators
    let scheduler = DigestScheduler::new(
        db.clone(),
        db.clone(),
        Arc::new(GeminiClient::new(gemini_api_key, gemini_model)),
        Arc::new(ExpoPushClient::new()),
        SchedulerConfig {
            language: digest_language,
            ..SchedulerConfig::default()
        },
    );
    scheduler.start();

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        hub: hub.clone(),
        scheduler: scheduler.clone(),
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms", post(rooms::create_room))
        .route("/rooms/{room_id}/join", post(rooms::join_room))
        .route("/rooms/{room_id}/presence", get(rooms::room_presence))
        .route("/rooms/{room_id}/messages", get(messages::get_messages))
        .route("/rooms/{room_id}/messages", post(messages::send_message))
        .route("/digest/topics", get(digest::get_topics))
        .route("/digest/settings", get(digest::get_settings))
        .route("/digest/settings", post(digest::save_settings))
        .route("/digest/push-token", post(digest::register_push_token))
        .route("/digest/history", get(digest::get_history))
        .route("/digest/test", post(digest::test_digest))
        .route("/digest/trigger", post(digest::trigger_digest))
        .route("/digest/{digest_id}", get(digest::get_digest))
        .route("/digest/{digest_id}", delete(digest::delete_digest))
        .layer(middleware::from_fn(require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/rooms/{room_id}/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Alcove server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler, hub))
        .await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

/// Authenticate the upgrade from the query token, then hand the socket to
/// the room connection loop.
async fn ws_upgrade(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token_data = decode::<Claims>(
        &query.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let claims = token_data.claims;

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_room_socket(
            socket,
            state.hub.clone(),
            room_id,
            claims.sub,
            claims.username,
        )
    }))
}

async fn shutdown_signal(scheduler: DigestScheduler, hub: RoomHub) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("shutdown signal received");
    scheduler.stop();
    hub.shutdown();
}
