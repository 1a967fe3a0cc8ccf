//! Transport implementations for the Chalkcast lobby protocol.
//!
//! This module provides concrete [`Transport`](crate::Transport) and
//! [`Connector`](crate::Connector) implementations behind feature gates.
//! Enable the corresponding Cargo feature to pull in a transport:
//!
//! | Feature                | Transport                                      |
//! |------------------------|------------------------------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] / [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), chalkcast_client::ChalkcastError> {
//! use chalkcast_client::{Transport, TransportItem, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:3536/ws/lobby/l1?token=t").await?;
//! ws.send(r#"{"type":"request_lobby_status"}"#.to_string()).await?;
//!
//! if let Some(Ok(TransportItem::Message(msg))) = ws.recv().await {
//!     println!("server said: {msg}");
//! }
//!
//! ws.close(1000, "done").await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
