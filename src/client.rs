//! Client API: the public [`ChalkcastClient`] handle plus the shared state
//! it exposes.
//!
//! The handle is a thin front for a background session task spawned by
//! [`ChalkcastClient::start`]: commands go in over an unbounded MPSC
//! channel, [`ChalkcastEvent`]s come back on a bounded one. No method on
//! the handle blocks on the network.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ChalkcastConfig::new("https://chalkcast.example", "lobby-1");
//! let credentials = HttpCredentialProvider::from_config(&config);
//! let directory = HttpParticipantDirectory::new(&config.base_url);
//! let (client, mut events) =
//!     ChalkcastClient::start(WebSocketConnector::new(), credentials, directory, config);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChalkcastEvent::QuestionChanged { index, .. } => { /* … */ }
//!         ChalkcastEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::credentials::CredentialProvider;
use crate::directory::ParticipantDirectory;
use crate::error::{ChalkcastError, Result};
use crate::event::ChalkcastEvent;
use crate::presence::Participant;
use crate::progress::{AnswerRecord, ProgressState};
use crate::protocol::{ClientMessage, LobbyId, ParticipantId, QuestionId};
use crate::session::{self, Command};
use crate::transport::Connector;

/// Default interval between application-level heartbeat frames.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Default capacity of the bounded event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a lobby session.
///
/// Must be supplied to [`ChalkcastClient::start`]. The only required
/// fields are the server base URL and the lobby id; all others have
/// sensible defaults.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use chalkcast_client::client::ChalkcastConfig;
///
/// let config = ChalkcastConfig::new("https://chalkcast.example", "lobby-1")
///     .with_heartbeat_interval(Duration::from_secs(15))
///     .with_periodic_resync(Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct ChalkcastConfig {
    /// HTTP(S) base URL of the lobby server, e.g. `https://chalkcast.example`.
    pub base_url: String,
    /// The lobby this session joins.
    pub lobby_id: LobbyId,
    /// Interval between heartbeat frames while connected.
    pub heartbeat_interval: Duration,
    /// Backoff schedule for automatic reconnection.
    pub backoff: BackoffPolicy,
    /// Capacity of the bounded event channel.
    pub event_channel_capacity: usize,
    /// How long [`ChalkcastClient::shutdown`] waits before aborting.
    pub shutdown_timeout: Duration,
    /// When set, a sync request is issued at this interval while
    /// connected, on top of the automatic post-connect sync. Off by
    /// default.
    pub resync_interval: Option<Duration>,
}

impl ChalkcastConfig {
    /// Creates a configuration with default tuning for the given server
    /// and lobby.
    pub fn new(base_url: impl Into<String>, lobby_id: impl Into<LobbyId>) -> Self {
        Self {
            base_url: base_url.into(),
            lobby_id: lobby_id.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff: BackoffPolicy::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            resync_interval: None,
        }
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the reconnect backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enables a periodic sync request at the given interval.
    #[must_use]
    pub fn with_periodic_resync(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }
}

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle of the underlying connection.
///
/// A connection is replaced, never repaired: each reconnect attempt
/// builds a fresh transport, so observers only ever see this machine move
/// through whole connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection attempt has started yet.
    Idle = 0,
    /// A credential fetch or transport dial is in flight.
    Connecting = 1,
    /// The transport is open and traffic flows.
    Open = 2,
    /// A graceful shutdown is closing the transport.
    Closing = 3,
    /// No transport exists: either between reconnect attempts or after
    /// the session ended normally.
    Closed = 4,
    /// Automatic reconnection gave up; only a manual
    /// [`reconnect`](ChalkcastClient::reconnect) leaves this state.
    Errored = 5,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Closing,
            4 => Self::Closed,
            5 => Self::Errored,
            _ => Self::Idle,
        }
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the session task. The session
/// task is the only writer; the handle reads snapshots.
pub(crate) struct ClientState {
    connection: AtomicU8,
    reconnect_attempts: AtomicU32,
    parse_failures: AtomicU64,
    generation: AtomicU64,
    last_error: Mutex<Option<String>>,
    roster: Mutex<Vec<Participant>>,
    progress: Mutex<ProgressState>,
    answers: Mutex<HashMap<(ParticipantId, QuestionId), AnswerRecord>>,
}

impl ClientState {
    pub(crate) fn new() -> Self {
        Self {
            connection: AtomicU8::new(ConnectionState::Idle as u8),
            reconnect_attempts: AtomicU32::new(0),
            parse_failures: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            last_error: Mutex::new(None),
            roster: Mutex::new(Vec::new()),
            progress: Mutex::new(ProgressState::default()),
            answers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn connection(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection.load(Ordering::SeqCst))
    }

    pub(crate) fn set_connection(&self, next: ConnectionState) {
        self.connection.store(next as u8, Ordering::SeqCst);
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::SeqCst);
    }

    pub(crate) fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Advances the connection generation. Called once per successful open.
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) async fn set_last_error(&self, error: Option<String>) {
        *self.last_error.lock().await = error;
    }

    pub(crate) async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    pub(crate) async fn publish_roster(&self, roster: Vec<Participant>) {
        *self.roster.lock().await = roster;
    }

    pub(crate) async fn roster(&self) -> Vec<Participant> {
        self.roster.lock().await.clone()
    }

    pub(crate) async fn publish_progress(&self, progress: ProgressState) {
        *self.progress.lock().await = progress;
    }

    pub(crate) async fn progress(&self) -> ProgressState {
        self.progress.lock().await.clone()
    }

    pub(crate) async fn publish_answers(
        &self,
        answers: HashMap<(ParticipantId, QuestionId), AnswerRecord>,
    ) {
        *self.answers.lock().await = answers;
    }

    pub(crate) async fn answers(&self) -> HashMap<(ParticipantId, QuestionId), AnswerRecord> {
        self.answers.lock().await.clone()
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to a running lobby session.
///
/// Created by [`ChalkcastClient::start`]. Methods post commands to the
/// session task; none of them block on the network. Dropping the handle
/// aborts the session task.
pub struct ChalkcastClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<ClientState>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl ChalkcastClient {
    /// Starts a session and returns the handle plus the event receiver.
    ///
    /// The session task immediately begins connecting: it fetches a
    /// credential from `credentials`, dials through `connector`, and on
    /// success requests a sync before emitting
    /// [`ChalkcastEvent::Connected`]. Connection failures are retried per
    /// the configured backoff.
    ///
    /// # Arguments
    ///
    /// * `connector` — Dials a fresh [`Transport`](crate::transport::Transport)
    ///   for every connection attempt.
    /// * `credentials` — Issues the short-lived socket credential before
    ///   each attempt.
    /// * `directory` — Resolves bare participant ids to display names.
    /// * `config` — Session tuning; see [`ChalkcastConfig`].
    ///
    /// # Returns
    ///
    /// A tuple of `(client_handle, event_receiver)`. The event receiver
    /// yields [`ChalkcastEvent`]s until the session ends; the final event
    /// is always [`ChalkcastEvent::Disconnected`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C, P, D>(
        connector: C,
        credentials: P,
        directory: D,
        config: ChalkcastConfig,
    ) -> (Self, mpsc::Receiver<ChalkcastEvent>)
    where
        C: Connector,
        P: CredentialProvider,
        D: ParticipantDirectory,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ChalkcastEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(ClientState::new());
        let shutdown_timeout = config.shutdown_timeout;

        let task = tokio::spawn(session::run(
            connector,
            credentials,
            directory,
            config,
            Arc::clone(&state),
            cmd_tx.clone(),
            cmd_rx,
            event_tx,
            shutdown_rx,
        ));

        let client = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Lobby operations ────────────────────────────────────────────

    /// Submits an answer for a question.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::NotConnected`] if the connection is not
    /// open, or [`ChalkcastError::SessionEnded`] if the session task has
    /// exited.
    pub fn submit_answer(
        &self,
        question_id: impl Into<QuestionId>,
        answer_index: usize,
    ) -> Result<()> {
        self.send(ClientMessage::SubmitAnswer {
            question_id: question_id.into(),
            answer_index,
        })
    }

    /// Asks the server to advance to the next question (host only).
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::NotConnected`] if the connection is not open.
    pub fn advance_question(&self) -> Result<()> {
        self.send(ClientMessage::AdvanceQuestion)
    }

    /// Asks the server to remove a participant from the lobby (host only).
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::NotConnected`] if the connection is not open.
    pub fn kick_participant(&self, id: impl Into<ParticipantId>) -> Result<()> {
        self.send(ClientMessage::KickParticipant { id: id.into() })
    }

    /// Requests an authoritative state snapshot.
    ///
    /// One is already requested automatically after every successful
    /// (re)connect; call this to force an extra refresh.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::NotConnected`] if the connection is not open.
    pub fn request_sync(&self) -> Result<()> {
        self.send(ClientMessage::RequestSync)
    }

    /// Requests the authoritative participant list.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::NotConnected`] if the connection is not open.
    pub fn request_participants(&self) -> Result<()> {
        self.send(ClientMessage::RequestParticipants)
    }

    /// Asks the server to repeat the current question push.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::NotConnected`] if the connection is not open.
    pub fn request_current_question(&self) -> Result<()> {
        self.send(ClientMessage::RequestCurrentQuestion)
    }

    /// Requests the current lobby lifecycle phase.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::NotConnected`] if the connection is not open.
    pub fn request_lobby_status(&self) -> Result<()> {
        self.send(ClientMessage::RequestLobbyStatus)
    }

    // ── Session control ─────────────────────────────────────────────

    /// Requests an immediate reconnect.
    ///
    /// Resets the backoff counter and retries right away when the session
    /// is waiting out a backoff delay or gave up after exhausting its
    /// attempts. Ignored (with a log line) while a connection is open. A
    /// request that lands while an attempt is mid-dial is applied once
    /// that attempt settles: ignored if it opened, an immediate retry if
    /// it failed.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::SessionEnded`] if the session task has
    /// exited.
    pub fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect)
    }

    /// Tells the session the application regained visibility or focus.
    ///
    /// Acts like [`reconnect`](Self::reconnect) when the session is
    /// disconnected and does nothing otherwise, so callers can forward
    /// every visibility signal without checking state first.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::SessionEnded`] if the session task has
    /// exited.
    pub fn notify_visibility_regained(&self) -> Result<()> {
        self.command(Command::VisibilityRegained)
    }

    /// Shuts the session down gracefully.
    ///
    /// Signals the session task, waits up to the configured shutdown
    /// timeout for it to close the transport and exit, then aborts it if
    /// it has not.
    pub async fn shutdown(&mut self) {
        debug!("shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the session task with a timeout. If it doesn't exit in
        // time, abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session task did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session task aborted: {join_err}");
                    }
                }
            }
        }

        self.state.set_connection(ConnectionState::Closed);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection()
    }

    /// Whether the connection is open right now.
    pub fn is_connected(&self) -> bool {
        self.state.connection() == ConnectionState::Open
    }

    /// Consecutive failed connection attempts. Resets to zero on every
    /// successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.state.reconnect_attempts()
    }

    /// Total inbound frames that failed to parse over the session's life.
    pub fn parse_failures(&self) -> u64 {
        self.state.parse_failures()
    }

    /// Connection generation: how many times a transport has opened.
    pub fn generation(&self) -> u64 {
        self.state.generation()
    }

    /// The most recent connection error, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.state.last_error().await
    }

    /// Snapshot of the participant roster, ordered by id.
    pub async fn roster(&self) -> Vec<Participant> {
        self.state.roster().await
    }

    /// Snapshot of the test progress state.
    pub async fn progress(&self) -> ProgressState {
        self.state.progress().await
    }

    /// Snapshot of the per-(participant, question) answer records.
    pub async fn answers(&self) -> HashMap<(ParticipantId, QuestionId), AnswerRecord> {
        self.state.answers().await
    }

    // ── Internal ────────────────────────────────────────────────────

    /// Posts a wire message, gated on the connection being open.
    fn send(&self, message: ClientMessage) -> Result<()> {
        if self.state.connection() != ConnectionState::Open {
            return Err(ChalkcastError::NotConnected);
        }
        self.cmd_tx
            .send(Command::Send(message))
            .map_err(|_| ChalkcastError::SessionEnded)
    }

    /// Posts a control command; valid in any connection state.
    fn command(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| ChalkcastError::SessionEnded)
    }
}

impl std::fmt::Debug for ChalkcastClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChalkcastClient")
            .field("connection", &self.connection_state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ChalkcastClient {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown.
        // The only safe action is to abort the spawned task, which causes
        // the session future to be dropped immediately.  The `shutdown_tx`
        // oneshot is intentionally *not* sent here: sending it would
        // trigger a graceful path that calls async `transport.close()`,
        // but there is no executor context to drive it inside `Drop`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
