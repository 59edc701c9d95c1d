use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    /// No digest settings stored for the requested user. Terminal for the
    /// call that asked.
    #[error("no digest settings found for user")]
    ConfigNotFound,

    /// The generation collaborator failed or returned an unusable result.
    /// Per-user and non-fatal to a scheduler tick; nothing is persisted.
    #[error("digest generation failed: {0}")]
    GenerationFailed(String),

    /// The delivery attempt failed. The digest stays persisted — history is
    /// written before any notification is sent.
    #[error("notification delivery failed: {0}")]
    NotificationFailed(String),

    /// The delivery address is missing or malformed; rejected before any
    /// remote call.
    #[error("invalid notification token")]
    InvalidToken,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
