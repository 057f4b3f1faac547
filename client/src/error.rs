//! Error types for the replica runtime.

use marksync_engine::{OwnerId, Topic};

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("owner mismatch: expected {expected}, got {actual}")]
    OwnerMismatch { expected: OwnerId, actual: OwnerId },

    #[error("channel not connected for topic {0}")]
    NotConnected(Topic),

    #[error("subscription rejected: {0}")]
    Rejected(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("replica store is closed")]
    StoreClosed,

    #[error("Engine error: {0}")]
    Engine(#[from] marksync_engine::Error),

    #[error("injected failure: {0}")]
    Injected(String),
}

impl ClientError {
    /// Whether retrying later may succeed.
    ///
    /// Transient failures are recovered locally by rollback or
    /// resynchronization and never treated as fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_)
            | ClientError::WebSocket(_)
            | ClientError::NotConnected(_)
            | ClientError::ConnectionClosed
            | ClientError::Injected(_) => true,
            ClientError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, ClientError>;
