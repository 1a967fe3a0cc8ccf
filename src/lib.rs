//! # Chalkcast Client
//!
//! Transport-agnostic Rust client for Chalkcast real-time quiz lobbies.
//!
//! This crate provides a high-level async client that joins a lobby's
//! WebSocket session, keeps it alive across network failures, and turns
//! the server's JSON frames into typed events and queryable state.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] and [`Connector`]
//!   traits for any backend
//! - **Self-healing** — reconnects with fresh credentials on exponential
//!   backoff, then resynchronizes lobby state
//! - **Event-driven** — receive typed [`ChalkcastEvent`]s via a channel
//! - **WebSocket built-in** — default `transport-websocket` feature provides
//!   [`WebSocketConnector`]
//! - **HTTP helpers** — default `http-api` feature provides credential and
//!   profile lookups against the Chalkcast REST API
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chalkcast_client::{
//!     ChalkcastClient, ChalkcastConfig, ChalkcastEvent, HttpCredentialProvider,
//!     HttpParticipantDirectory, WebSocketConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ChalkcastConfig::new("https://chalkcast.example", "lobby-42");
//!     let (client, mut events) = ChalkcastClient::start(
//!         WebSocketConnector::new(),
//!         HttpCredentialProvider::from_config(&config),
//!         HttpParticipantDirectory::new(&config.base_url),
//!         config,
//!     );
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ChalkcastEvent::QuestionChanged { index, .. } => {
//!                 client.submit_answer(format!("q-{index}"), 0).ok();
//!             }
//!             ChalkcastEvent::Disconnected { reason } => {
//!                 eprintln!("session over: {reason:?}");
//!                 break;
//!             }
//!             other => println!("{other:?}"),
//!         }
//!     }
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod event;
#[cfg(feature = "http-api")]
pub mod http;
pub mod presence;
pub mod progress;
pub mod protocol;
pub mod router;
mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use backoff::BackoffPolicy;
pub use client::{ChalkcastClient, ChalkcastConfig, ConnectionState};
pub use credentials::{Credential, CredentialProvider};
pub use directory::{NullDirectory, ParticipantDirectory};
pub use error::ChalkcastError;
pub use event::ChalkcastEvent;
#[cfg(feature = "http-api")]
pub use http::{HttpCredentialProvider, HttpParticipantDirectory};
pub use presence::Participant;
pub use progress::{AnswerRecord, ProgressState};
pub use protocol::{
    ClientMessage, LobbyId, LobbyStatus, ParticipantId, QuestionId, ServerMessage,
};
pub use transport::{CloseInfo, Connector, Transport, TransportItem};
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
