//! Error types for the race room bot
//!
//! Fallible operations return the anyhow-based [`Result`]; the typed
//! [`BotError`] variants are attached to those errors wherever callers need
//! to tell a transient fault from a fatal one.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific bot scenarios
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BotError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Rate limit overflow: {reason}")]
    RateLimitOverflow { reason: String },

    #[error("Discovery failed: {message}")]
    Discovery { message: String },

    #[error("Server reported errors: {}", errors.join("; "))]
    Server { errors: Vec<String> },

    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Room {slug} is closed")]
    RoomClosed { slug: String },

    #[error("Fatal room failure: {reason}")]
    Fatal { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl BotError {
    /// Whether this error permanently closes the room it occurred in
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::Fatal { .. })
    }
}

/// Check whether an anyhow error carries a fatal [`BotError`]
pub fn is_fatal(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<BotError>()
        .map(BotError::is_fatal)
        .unwrap_or(false)
}
