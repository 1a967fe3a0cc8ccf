//! # Live Session Example
//!
//! Demonstrates a complete Chalkcast client lifecycle:
//!
//! 1. Fetch a socket token from the lobby server's REST API
//! 2. Join the lobby over WebSocket
//! 3. React to session events (roster changes, questions, reveals)
//! 4. Submit an answer whenever a new question arrives
//! 5. Ride out disconnects, shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start a Chalkcast server on localhost:3536, then:
//! cargo run --example live_session
//!
//! # Point at another server or lobby:
//! CHALKCAST_BASE_URL=https://chalkcast.example \
//! CHALKCAST_LOBBY_ID=lobby-42 cargo run --example live_session
//! ```

use chalkcast_client::{
    ChalkcastClient, ChalkcastConfig, ChalkcastEvent, HttpCredentialProvider,
    HttpParticipantDirectory, WebSocketConnector,
};

/// Default server base URL when `CHALKCAST_BASE_URL` is not set.
const DEFAULT_BASE_URL: &str = "http://localhost:3536";

/// Default lobby when `CHALKCAST_LOBBY_ID` is not set.
const DEFAULT_LOBBY_ID: &str = "demo-lobby";

#[tokio::main]
async fn main() {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let base_url =
        std::env::var("CHALKCAST_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let lobby_id =
        std::env::var("CHALKCAST_LOBBY_ID").unwrap_or_else(|_| DEFAULT_LOBBY_ID.to_string());
    tracing::info!("Joining lobby {lobby_id} at {base_url}");

    let config = ChalkcastConfig::new(base_url, lobby_id);

    // ── Start ───────────────────────────────────────────────────────
    // The client owns the whole connection lifecycle: it fetches a fresh
    // token before every dial and reconnects on its own after failures.
    let credentials = HttpCredentialProvider::from_config(&config);
    let directory = HttpParticipantDirectory::new(&config.base_url);
    let (mut client, mut event_rx) =
        ChalkcastClient::start(WebSocketConnector::new(), credentials, directory, config);

    // ── Event loop ──────────────────────────────────────────────────
    // Use `tokio::select!` to listen for both session events and Ctrl+C.
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    // Channel closed — the session task exited.
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    // ── Connection lifecycle ─────────────────────────
                    ChalkcastEvent::Connected { generation } => {
                        tracing::info!("Connected (generation {generation})");
                    }

                    ChalkcastEvent::ConnectionLost { reason } => {
                        tracing::warn!("Connection lost: {reason}");
                    }

                    ChalkcastEvent::ReconnectScheduled { attempt, delay } => {
                        tracing::info!("Reconnect attempt {attempt} in {delay:?}");
                    }

                    ChalkcastEvent::ReconnectFailed { attempts } => {
                        tracing::error!(
                            "Gave up after {attempts} attempts; \
                             call client.reconnect() to try again"
                        );
                        break;
                    }

                    // ── Lobby state ──────────────────────────────────
                    ChalkcastEvent::RosterChanged { roster } => {
                        let online = roster.iter().filter(|p| p.online).count();
                        tracing::info!(
                            "Roster: {} participant(s), {online} online",
                            roster.len()
                        );
                    }

                    ChalkcastEvent::PhaseChanged { status } => {
                        tracing::info!("Lobby phase → {status:?}");
                    }

                    // ── Question flow ────────────────────────────────
                    ChalkcastEvent::QuestionChanged { index, id } => {
                        tracing::info!("Question {} is live ({id})", index + 1);

                        // Play along: always pick the first choice. A send
                        // can race a disconnect, so a refusal is not fatal.
                        if let Err(error) = client.submit_answer(id, 0) {
                            tracing::warn!("Could not submit answer: {error}");
                        }
                    }

                    ChalkcastEvent::CorrectAnswerRevealed { index, correct_index, .. } => {
                        match correct_index {
                            Some(correct) => tracing::info!(
                                "Question {} answer revealed: choice {correct}",
                                index + 1
                            ),
                            None => tracing::info!("Question {} answer revealed", index + 1),
                        }
                    }

                    ChalkcastEvent::AnswerRecorded { participant_id, .. } => {
                        tracing::debug!("{participant_id} answered");
                    }

                    // ── Session end ──────────────────────────────────
                    ChalkcastEvent::Kicked { reason } => {
                        tracing::warn!(
                            "Kicked from the lobby: {}",
                            reason.as_deref().unwrap_or("no reason given")
                        );
                    }

                    ChalkcastEvent::LobbyClosed { reason } => {
                        tracing::info!(
                            "Lobby closed: {}",
                            reason.as_deref().unwrap_or("no reason given")
                        );
                    }

                    ChalkcastEvent::Disconnected { reason } => {
                        tracing::warn!(
                            "Session over: {}",
                            reason.as_deref().unwrap_or("shut down")
                        );
                        break;
                    }

                    // ── Catch-all ────────────────────────────────────
                    other => {
                        tracing::debug!("Event: {other:?}");
                    }
                }
            }

            // Ctrl+C — shut down gracefully.
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Client shut down. Goodbye!");
}
