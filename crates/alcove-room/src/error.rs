use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The hub is no longer accepting subscribers. Retryable once the
    /// process is serving again; callers re-subscribe rather than keep a
    /// dead handle.
    #[error("room channel unavailable")]
    ChannelUnavailable,

    /// Room and subscriber ids must be non-nil.
    #[error("invalid room or subscriber id")]
    InvalidSubscriber,
}
