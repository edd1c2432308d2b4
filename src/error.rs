//! Error types for the voice session core.

/// Top-level error type for a voice session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Microphone or speaker could not be acquired (permission denied,
    /// device missing, stream refused to open).
    #[error("audio acquisition error: {0}")]
    Acquisition(String),

    /// The connection to the remote agent could not be opened, or closed
    /// or failed mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound audio payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// The host action handler failed.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// `start()` was called while a session is already running.
    #[error("a voice session is already active")]
    AlreadyActive,

    /// `stop()` was called before `start()` finished acquiring.
    #[error("session start cancelled by stop")]
    StartCancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
