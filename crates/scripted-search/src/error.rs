use std::time::Duration;

/// Errors that can occur in search sessions.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Channel or connection failure underneath the session.
    #[error("channel error: {0}")]
    Mux(#[from] scripted_mux::MuxError),

    /// A payload could not be encoded or decoded as JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A well-formed JSON payload that breaks the search protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The session was closed, locally or by the server.
    #[error("search session is closed")]
    SessionClosed,

    /// No `done` arrived in time.
    #[error("no completion within {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;
