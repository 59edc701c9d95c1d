pub mod channel;
pub mod connection;
mod error;

pub use channel::{RoomHub, RoomHubConfig, RoomSubscription, TypingSender};
pub use error::RoomError;
