#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Chalkcast Client integration tests.
//!
//! Provides scripted [`MockTransport`] / [`MockConnector`] implementations,
//! credential and directory stubs, and helper functions for constructing
//! server frame JSON strings.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use chalkcast_client::{
    ChalkcastError, ChalkcastEvent, ClientMessage, CloseInfo, Connector, Credential,
    CredentialProvider, ParticipantDirectory, Transport, TransportItem,
};

/// One scripted `recv()` outcome.
pub type ScriptItem = Option<Result<TransportItem, ChalkcastError>>;

/// Scripts an inbound text message.
pub fn message(text: impl Into<String>) -> ScriptItem {
    Some(Ok(TransportItem::Message(text.into())))
}

/// Scripts a close frame from the server.
pub fn server_close(code: u16, reason: &str) -> ScriptItem {
    Some(Ok(TransportItem::Closed(CloseInfo {
        code,
        reason: reason.to_owned(),
    })))
}

/// Scripts a transport-level receive error.
pub fn recv_error(text: &str) -> ScriptItem {
    Some(Err(ChalkcastError::TransportReceive(text.to_owned())))
}

/// Scripts the stream ending without a close frame.
pub fn stream_end() -> ScriptItem {
    None
}

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted transport for integration testing.
///
/// Scripted items are consumed in order by `recv()`; once the script runs
/// out, `recv()` hangs so the connection stays up until the test ends it.
/// Everything the client sends is recorded in `sent`.
pub struct MockTransport {
    incoming: VecDeque<ScriptItem>,
    /// Recorded outgoing messages from the client.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// The `(code, reason)` passed to `close()`, when it was called.
    pub closed: Arc<StdMutex<Option<(u16, String)>>>,
}

impl MockTransport {
    /// Create a mock transport with the given script.
    ///
    /// Returns the transport plus shared handles for inspecting sent
    /// messages and the close call.
    #[allow(clippy::type_complexity)]
    pub fn new(
        incoming: Vec<ScriptItem>,
    ) -> (
        Self,
        Arc<StdMutex<Vec<String>>>,
        Arc<StdMutex<Option<(u16, String)>>>,
    ) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(StdMutex::new(None));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ChalkcastError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<TransportItem, ChalkcastError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted items — hang forever so the connection
            // stays alive until the test shuts the session down.
            std::future::pending().await
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ChalkcastError> {
        *self.closed.lock().unwrap() = Some((code, reason.to_owned()));
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// A connector preloaded with per-attempt outcomes.
///
/// Each `connect()` pops the next outcome; once they run out the dial
/// hangs, keeping the session in `Connecting` so the test can end it
/// deterministically. Every dialed URL is recorded.
pub struct MockConnector {
    attempts: StdMutex<VecDeque<Result<MockTransport, ChalkcastError>>>,
    dialed: Arc<StdMutex<Vec<String>>>,
}

impl MockConnector {
    /// Create a connector with the given per-attempt outcomes.
    ///
    /// Returns the connector plus a shared handle listing every URL it
    /// was asked to dial.
    pub fn new(
        attempts: Vec<Result<MockTransport, ChalkcastError>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>) {
        let dialed = Arc::new(StdMutex::new(Vec::new()));
        let connector = Self {
            attempts: StdMutex::new(VecDeque::from(attempts)),
            dialed: Arc::clone(&dialed),
        };
        (connector, dialed)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, url: &str) -> Result<MockTransport, ChalkcastError> {
        self.dialed.lock().unwrap().push(url.to_owned());
        let next = self.attempts.lock().unwrap().pop_front();
        match next {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

// ── Credential and directory stubs ──────────────────────────────────

/// Issues `tok-1`, `tok-2`, … on successive fetches, so tests can verify
/// that every connection attempt uses a fresh credential.
pub struct SequentialCredentials {
    calls: Arc<AtomicU32>,
}

impl SequentialCredentials {
    pub fn new() -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl CredentialProvider for SequentialCredentials {
    async fn fetch(&self) -> Result<Credential, ChalkcastError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("tok-{n}");
        Ok(Credential {
            socket_url: format!("wss://lobby.test/ws/lobby/l1?token={token}"),
            token,
        })
    }
}

/// A fixed id → display name table. Ids outside the table resolve to
/// `None`. Every lookup is recorded.
pub struct MockDirectory {
    names: HashMap<String, String>,
    lookups: Arc<StdMutex<Vec<String>>>,
}

impl MockDirectory {
    pub fn new(entries: &[(&str, &str)]) -> (Self, Arc<StdMutex<Vec<String>>>) {
        let lookups = Arc::new(StdMutex::new(Vec::new()));
        let names = entries
            .iter()
            .map(|(id, name)| ((*id).to_owned(), (*name).to_owned()))
            .collect();
        (
            Self {
                names,
                lookups: Arc::clone(&lookups),
            },
            lookups,
        )
    }
}

#[async_trait]
impl ParticipantDirectory for MockDirectory {
    async fn display_name(&self, id: &str) -> Result<Option<String>, ChalkcastError> {
        self.lookups.lock().unwrap().push(id.to_owned());
        Ok(self.names.get(id).cloned())
    }
}

// ── JSON frame helpers ──────────────────────────────────────────────

/// Returns the JSON string for a frame with a payload.
pub fn frame(message_type: &str, data: serde_json::Value) -> String {
    json!({ "type": message_type, "data": data }).to_string()
}

/// Returns the JSON string for a bare marker frame.
pub fn bare_frame(message_type: &str) -> String {
    json!({ "type": message_type }).to_string()
}

/// Returns the JSON string for a server keep-alive.
pub fn heartbeat_json() -> String {
    bare_frame("heartbeat")
}

/// Returns the JSON string for a `user_joined` frame.
pub fn user_joined_json(id: &str, name: &str, is_host: bool) -> String {
    frame("user_joined", json!({ "id": id, "name": name, "is_host": is_host }))
}

/// Returns the JSON string for a `user_left` frame.
pub fn user_left_json(id: &str) -> String {
    frame("user_left", json!({ "id": id }))
}

/// Returns the JSON string for a `user_status_update` frame.
pub fn user_status_json(id: &str, status: &str) -> String {
    frame("user_status_update", json!({ "id": id, "status": status }))
}

/// Returns the JSON string for a `participants_updated` frame (bare ids).
pub fn participants_updated_json(ids: &[&str]) -> String {
    frame("participants_updated", json!({ "ids": ids }))
}

/// Returns the JSON string for a `participants_list` frame. `participants`
/// is the raw record array.
pub fn participants_list_json(participants: serde_json::Value) -> String {
    frame("participants_list", json!({ "participants": participants }))
}

/// Returns the JSON string for a `lobby_updated` frame.
pub fn lobby_updated_json(status: &str) -> String {
    frame("lobby_updated", json!({ "status": status }))
}

/// Returns the JSON string for a `next_question` frame.
pub fn next_question_json(index: usize, id: &str) -> String {
    frame("next_question", json!({ "index": index, "id": id }))
}

/// Returns the JSON string for a `current_question` frame.
pub fn current_question_json(index: usize, id: &str) -> String {
    frame("current_question", json!({ "index": index, "id": id }))
}

/// Returns the JSON string for a `sync_response` frame. `data` is the raw
/// snapshot object.
pub fn sync_response_json(data: serde_json::Value) -> String {
    frame("sync_response", data)
}

/// Returns the JSON string for a `show_correct_answer` frame.
pub fn show_correct_answer_json(id: &str, index: usize, correct_index: Option<usize>) -> String {
    frame(
        "show_correct_answer",
        json!({ "id": id, "index": index, "correct_index": correct_index }),
    )
}

/// Returns the JSON string for a `toggle_participant_answers` frame.
pub fn toggle_answers_json(visible: bool) -> String {
    frame("toggle_participant_answers", json!({ "visible": visible }))
}

/// Returns the JSON string for an `answer_received` frame.
pub fn answer_received_json(
    participant_id: &str,
    question_id: &str,
    answer_index: Option<usize>,
) -> String {
    frame(
        "answer_received",
        json!({
            "participant_id": participant_id,
            "question_id": question_id,
            "answer_index": answer_index,
            "submitted_at": "2026-03-01T10:00:00Z",
        }),
    )
}

/// Returns the JSON string for a `participant_answered` frame.
pub fn participant_answered_json(participant_id: &str, question_id: &str) -> String {
    frame(
        "participant_answered",
        json!({ "participant_id": participant_id, "question_id": question_id }),
    )
}

/// Returns the JSON string for a `test_started` frame.
pub fn test_started_json() -> String {
    bare_frame("test_started")
}

/// Returns the JSON string for a `test_finished` frame.
pub fn test_finished_json() -> String {
    bare_frame("test_finished")
}

/// Returns the JSON string for a `user_kicked` frame.
pub fn user_kicked_json(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => frame("user_kicked", json!({ "reason": reason })),
        None => frame("user_kicked", json!({})),
    }
}

/// Returns the JSON string for a `lobby_closed` frame.
pub fn lobby_closed_json(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => frame("lobby_closed", json!({ "reason": reason })),
        None => frame("lobby_closed", json!({})),
    }
}

// ── Event and frame inspection helpers ──────────────────────────────

/// Receives the next event, panicking after two seconds.
pub async fn next_event(events: &mut mpsc::Receiver<ChalkcastEvent>) -> ChalkcastEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed while waiting for an event")
}

/// Skips events until one matches the predicate, panicking after two
/// seconds or if the channel closes first.
pub async fn next_event_where(
    events: &mut mpsc::Receiver<ChalkcastEvent>,
    description: &str,
    mut predicate: impl FnMut(&ChalkcastEvent) -> bool,
) -> ChalkcastEvent {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {description}"))
            .unwrap_or_else(|| panic!("event channel closed waiting for {description}"));
        if predicate(&event) {
            return event;
        }
    }
}

/// Parses every recorded outbound frame into a [`ClientMessage`].
pub fn decode_sent(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientMessage> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|raw| serde_json::from_str(raw).expect("outbound frame parses as ClientMessage"))
        .collect()
}
