//! Error types for the Chalkcast client.

use thiserror::Error;

/// Errors that can occur when using the Chalkcast client.
#[derive(Debug, Error)]
pub enum ChalkcastError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Fetching a session credential from the token endpoint failed.
    #[error("credential fetch failed: {0}")]
    Credential(String),

    /// Looking up a participant profile failed.
    #[error("participant lookup failed: {0}")]
    Directory(String),

    /// The configured base URL cannot be turned into a lobby socket URL.
    #[error("invalid lobby URL: {0}")]
    InvalidUrl(String),

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected to lobby")]
    NotConnected,

    /// The background session task has exited; this handle can no longer
    /// reach the lobby.
    #[error("session has ended")]
    SessionEnded,

    /// Automatic reconnection gave up after exhausting the configured attempt budget.
    #[error("reconnect attempts exhausted after {attempts} consecutive failures")]
    RetriesExhausted {
        /// Consecutive failed attempts at the time the orchestrator gave up.
        attempts: u32,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Chalkcast client operations.
pub type Result<T> = std::result::Result<T, ChalkcastError>;
