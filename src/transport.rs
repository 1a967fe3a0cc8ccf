//! Transport abstraction for the Chalkcast lobby protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and server. The lobby protocol uses JSON text
//! messages, so every transport implementation must handle message framing
//! internally (e.g., WebSocket frames, length-prefixed TCP, QUIC streams).
//!
//! Unlike a plain message pipe, a transport here also reports *how* it
//! ended: close frames surface as [`TransportItem::Closed`] with their code
//! and reason, because the reconnection layer treats codes 1000/1001 as
//! intentional and everything else as a failure worth retrying.
//!
//! Connection setup lives behind the separate [`Connector`] trait — the
//! session reopens the transport on every reconnect with a freshly
//! credentialed URL, so it needs a factory, not a pre-connected socket.

use async_trait::async_trait;

use crate::error::ChalkcastError;

/// Close codes that signal intentional termination rather than failure.
const CLEAN_CLOSE_CODES: [u16; 2] = [1000, 1001];

/// Why the server (or intermediary) closed the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code from the transport's close frame.
    pub code: u16,
    /// Human-readable reason, often empty.
    pub reason: String,
}

impl CloseInfo {
    /// Whether this closure signals intentional termination (codes 1000
    /// and 1001). Anything else is treated as unexpected and triggers
    /// reconnection.
    pub fn is_clean(&self) -> bool {
        CLEAN_CLOSE_CODES.contains(&self.code)
    }
}

/// One item produced by [`Transport::recv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportItem {
    /// A complete text message.
    Message(String),
    /// The peer closed the connection with a close frame.
    Closed(CloseInfo),
}

/// A bidirectional text message transport for the lobby protocol.
///
/// Implementors shuttle serialized JSON strings between the client and
/// server. Each call to [`send`](Transport::send) transmits one complete
/// JSON message; each call to [`recv`](Transport::recv) yields one complete
/// message or the close frame that ended the stream.
///
/// # Object Safety
///
/// This trait is object-safe, so `Box<dyn Transport>` works for dynamic
/// dispatch. The session is monomorphized over [`Connector::Transport`] for
/// the common case.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it
/// is used inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data. Channel-based
/// implementations (e.g., wrapping `mpsc::Receiver`) are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::TransportSend`] if the message could not
    /// be sent (e.g., connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), ChalkcastError>;

    /// Receive the next item from the server.
    ///
    /// Returns:
    /// - `Some(Ok(TransportItem::Message(text)))` — a complete message
    /// - `Some(Ok(TransportItem::Closed(info)))` — the peer sent a close
    ///   frame; no further messages will arrive
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the stream ended without a close frame (treated as an
    ///   unexpected disconnect upstream)
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<TransportItem, ChalkcastError>>;

    /// Close the transport gracefully with the given code and reason.
    ///
    /// After calling this method, subsequent calls to
    /// [`send`](Transport::send) and [`recv`](Transport::recv) may return
    /// errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ChalkcastError>;
}

/// Opens a fresh [`Transport`] for a lobby socket URL.
///
/// The reconnection orchestrator calls this before every attempt — each
/// connection uses a newly fetched credential baked into the URL, so
/// transports are never reused across attempts.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport type this connector produces.
    type Transport: Transport;

    /// Open a transport to the given URL.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error when the connection cannot be
    /// established; the orchestrator counts it against the backoff budget.
    async fn connect(&self, url: &str) -> Result<Self::Transport, ChalkcastError>;
}

// ── Tests ───────────────────────────────────────────────────────────
