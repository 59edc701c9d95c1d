pub mod auth;
pub mod digest;
pub mod messages;
pub mod middleware;
pub mod rooms;

use std::sync::Arc;

use alcove_digest::DigestScheduler;
use alcove_room::RoomHub;
use alcove_store::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub hub: RoomHub,
    pub scheduler: DigestScheduler,
    pub jwt_secret: String,
}
