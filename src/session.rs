//! The background session task.
//!
//! One task per [`ChalkcastClient`](crate::client::ChalkcastClient): an
//! outer reconnect loop that builds whole connections (credential fetch,
//! dial, post-connect sync) and an inner loop that multiplexes commands,
//! heartbeats, and inbound traffic with `tokio::select!`. The task owns
//! the presence and progress reconcilers; the handle only ever sees
//! published snapshots.
//!
//! Connections are replaced, never repaired. When one dies unexpectedly
//! the task waits out the backoff delay, fetches a *fresh* credential
//! (tokens are single-use), dials again, and requests a sync so the
//! reconcilers can catch up on whatever was missed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::{ChalkcastConfig, ClientState, ConnectionState};
use crate::credentials::{CredentialCache, CredentialProvider};
use crate::directory::ParticipantDirectory;
use crate::error::ChalkcastError;
use crate::event::ChalkcastEvent;
use crate::presence::PresenceReconciler;
use crate::progress::{CursorOutcome, ProgressSynchronizer};
use crate::protocol::{
    ClientMessage, LobbyStatus, ParticipantId, ParticipantKickedPayload, ServerMessage,
    UserLeftPayload,
};
use crate::router::{classify, Classified};
use crate::transport::{Connector, Transport, TransportItem};

// ── Commands ────────────────────────────────────────────────────────

/// Commands posted to the session task by the handle and by spawned
/// directory-lookup tasks.
#[derive(Debug)]
pub(crate) enum Command {
    /// Serialize and send a wire message. Only honored while connected.
    Send(ClientMessage),
    /// Reset the backoff counter and retry now, if disconnected.
    Reconnect,
    /// The application regained visibility; treated as [`Command::Reconnect`]
    /// when disconnected and ignored otherwise.
    VisibilityRegained,
    /// A directory lookup finished. `generation` pins the resolution to
    /// the connection that requested it.
    LookupResolved {
        generation: u64,
        id: ParticipantId,
        name: Option<String>,
    },
}

// ── Flow control ────────────────────────────────────────────────────

/// Why the connected phase ended.
enum ConnectionEnd {
    /// Shutdown was requested or the handle went away.
    Shutdown,
    /// The server ended the session deliberately (clean close, kick, or
    /// lobby close). No reconnect.
    Finished { reason: Option<String> },
    /// The connection died. The reconnect loop takes over.
    Lost { reason: String },
}

/// How a disconnected wait ended.
enum WaitOutcome {
    /// The backoff delay elapsed.
    Elapsed,
    /// A manual reconnect or visibility regain cut the wait short.
    RetryNow,
    /// Shutdown was requested or the handle went away.
    Shutdown,
}

// ── Entry point ─────────────────────────────────────────────────────

/// Runs a session to completion. Spawned by
/// [`ChalkcastClient::start`](crate::client::ChalkcastClient::start).
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run<C, P, D>(
    connector: C,
    credentials: P,
    directory: D,
    config: ChalkcastConfig,
    state: Arc<ClientState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<ChalkcastEvent>,
    shutdown_rx: oneshot::Receiver<()>,
) where
    C: Connector,
    P: CredentialProvider,
    D: ParticipantDirectory,
{
    let mut session = Session {
        connector,
        credentials: CredentialCache::new(Arc::new(credentials)),
        directory: Arc::new(directory),
        config,
        state,
        cmd_tx,
        cmd_rx,
        event_tx,
        shutdown_rx,
        presence: PresenceReconciler::new(),
        progress: ProgressSynchronizer::new(),
        generation: 0,
    };

    let reason = session.reconnect_loop().await;
    session
        .emit_terminal(ChalkcastEvent::Disconnected { reason })
        .await;
    debug!("session task exiting");
}

// ── Session ─────────────────────────────────────────────────────────

struct Session<C: Connector, P: CredentialProvider, D: ParticipantDirectory> {
    connector: C,
    credentials: CredentialCache<P>,
    directory: Arc<D>,
    config: ChalkcastConfig,
    state: Arc<ClientState>,
    /// Kept so spawned lookup tasks can post resolutions back.
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<ChalkcastEvent>,
    shutdown_rx: oneshot::Receiver<()>,
    presence: PresenceReconciler,
    progress: ProgressSynchronizer,
    /// Connection epoch; bumped on every successful open. Lookup
    /// resolutions carrying an older epoch are dropped.
    generation: u64,
}

impl<C, P, D> Session<C, P, D>
where
    C: Connector,
    P: CredentialProvider,
    D: ParticipantDirectory,
{
    /// The outer loop: connect, drive, and on unexpected loss retry with
    /// exponential backoff. Returns the session-end reason for the
    /// terminal [`ChalkcastEvent::Disconnected`].
    async fn reconnect_loop(&mut self) -> Option<String> {
        let mut failures: u32 = 0;

        loop {
            self.state.set_connection(ConnectionState::Connecting);

            let transport = match self.connect_once().await {
                Ok(Some(transport)) => transport,
                Ok(None) => {
                    // Shutdown arrived mid-attempt.
                    self.state.set_connection(ConnectionState::Closed);
                    return None;
                }
                Err(error) => {
                    let reason = error.to_string();
                    warn!(reason = %reason, "connection attempt failed");
                    self.state.set_connection(ConnectionState::Closed);
                    self.state.set_last_error(Some(reason)).await;
                    match self.next_attempt(&mut failures).await {
                        WaitOutcome::Elapsed | WaitOutcome::RetryNow => continue,
                        WaitOutcome::Shutdown => {
                            self.state.set_connection(ConnectionState::Closed);
                            return None;
                        }
                    }
                }
            };
            let mut transport = transport;

            failures = 0;
            self.state.set_reconnect_attempts(0);
            self.state.set_last_error(None).await;
            self.generation = self.state.next_generation();
            // Resolutions from the previous connection must not leak in.
            self.presence.clear_pending_lookups();
            self.state.set_connection(ConnectionState::Open);
            info!(
                generation = self.generation,
                lobby_id = %self.config.lobby_id,
                "connected to lobby"
            );

            match self.drive_connection(&mut transport).await {
                ConnectionEnd::Shutdown => {
                    self.state.set_connection(ConnectionState::Closing);
                    if let Err(error) = transport.close(1000, "client shutting down").await {
                        debug!(%error, "error closing transport during shutdown");
                    }
                    self.state.set_connection(ConnectionState::Closed);
                    return None;
                }
                ConnectionEnd::Finished { reason } => {
                    self.state.set_connection(ConnectionState::Closing);
                    if let Err(error) = transport.close(1000, "").await {
                        debug!(%error, "error closing transport after session end");
                    }
                    self.state.set_connection(ConnectionState::Closed);
                    return reason;
                }
                ConnectionEnd::Lost { reason } => {
                    warn!(reason = %reason, "connection lost");
                    self.state.set_connection(ConnectionState::Closed);
                    self.state.set_last_error(Some(reason.clone())).await;
                    self.emit(ChalkcastEvent::ConnectionLost { reason });
                    match self.next_attempt(&mut failures).await {
                        WaitOutcome::Elapsed | WaitOutcome::RetryNow => continue,
                        WaitOutcome::Shutdown => {
                            self.state.set_connection(ConnectionState::Closed);
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Records a failure and waits for the next attempt: either the
    /// backoff delay, or — once the budget is exhausted — a manual
    /// reconnect. Both kinds of wait can be cut short by commands.
    async fn next_attempt(&mut self, failures: &mut u32) -> WaitOutcome {
        *failures += 1;
        self.state.set_reconnect_attempts(*failures);

        if self.config.backoff.exhausted(*failures) {
            warn!(
                attempts = *failures,
                "giving up on automatic reconnection"
            );
            self.state.set_connection(ConnectionState::Errored);
            self.state
                .set_last_error(Some(
                    ChalkcastError::RetriesExhausted {
                        attempts: *failures,
                    }
                    .to_string(),
                ))
                .await;
            self.emit(ChalkcastEvent::ReconnectFailed {
                attempts: *failures,
            });
            let outcome = self.wait_while_disconnected(None).await;
            if matches!(outcome, WaitOutcome::RetryNow) {
                *failures = 0;
                self.state.set_reconnect_attempts(0);
            }
            outcome
        } else {
            let delay = self.config.backoff.delay_for(*failures - 1);
            info!(attempt = *failures, ?delay, "scheduling reconnect");
            self.emit(ChalkcastEvent::ReconnectScheduled {
                attempt: *failures,
                delay,
            });
            let outcome = self.wait_while_disconnected(Some(delay)).await;
            if matches!(outcome, WaitOutcome::RetryNow) {
                *failures = 0;
                self.state.set_reconnect_attempts(0);
            }
            outcome
        }
    }

    /// Runs one connection attempt: fresh credential, then dial. Returns
    /// `Ok(None)` when shutdown preempts the attempt.
    async fn connect_once(&mut self) -> Result<Option<C::Transport>, ChalkcastError> {
        let credentials = &self.credentials;
        let connector = &self.connector;
        let attempt = async move {
            let credential = credentials.fetch().await?;
            debug!(url = %credential.socket_url, "dialing lobby socket");
            connector.connect(&credential.socket_url).await
        };

        tokio::select! {
            _ = &mut self.shutdown_rx => Ok(None),
            result = attempt => result.map(Some),
        }
    }

    /// Waits while disconnected. With a delay this is a backoff wait;
    /// without one it blocks until a manual reconnect (the terminal
    /// `Errored` state). Outbound sends arriving meanwhile are dropped —
    /// the handle already refused them, these are stragglers.
    async fn wait_while_disconnected(&mut self, delay: Option<Duration>) -> WaitOutcome {
        let sleep = async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => return WaitOutcome::Shutdown,
                () = &mut sleep => return WaitOutcome::Elapsed,
                command = self.cmd_rx.recv() => match command {
                    None => return WaitOutcome::Shutdown,
                    Some(Command::Reconnect) => {
                        debug!("manual reconnect while disconnected; retrying now");
                        return WaitOutcome::RetryNow;
                    }
                    Some(Command::VisibilityRegained) => {
                        debug!("visibility regained while disconnected; retrying now");
                        return WaitOutcome::RetryNow;
                    }
                    Some(Command::Send(message)) => {
                        debug!(?message, "dropping outbound message while disconnected");
                    }
                    Some(Command::LookupResolved { id, .. }) => {
                        debug!(id = %id, "dropping directory resolution while disconnected");
                    }
                },
            }
        }
    }

    /// The inner loop for one open connection. Sends the post-connect
    /// sync request and emits [`ChalkcastEvent::Connected`], then
    /// multiplexes commands, heartbeats, the optional periodic resync,
    /// and inbound traffic until something ends it.
    async fn drive_connection(&mut self, transport: &mut C::Transport) -> ConnectionEnd {
        // The sync request re-arms server-side push state and lets the
        // reconcilers catch up on anything missed while disconnected.
        // `Connected` is only announced once it is on the wire.
        if let Err(error) = send_message(transport, &ClientMessage::RequestSync).await {
            return ConnectionEnd::Lost {
                reason: error.to_string(),
            };
        }
        self.emit(ChalkcastEvent::Connected {
            generation: self.generation,
        });

        let mut heartbeat = interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut resync = self.config.resync_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => return ConnectionEnd::Shutdown,

                command = self.cmd_rx.recv() => {
                    let Some(command) = command else {
                        return ConnectionEnd::Shutdown;
                    };
                    if let Some(end) = self.handle_command(transport, command).await {
                        return end;
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(error) = send_message(transport, &ClientMessage::Heartbeat).await {
                        return ConnectionEnd::Lost { reason: error.to_string() };
                    }
                }

                () = tick_opt(resync.as_mut()) => {
                    debug!("periodic resync");
                    if let Err(error) = send_message(transport, &ClientMessage::RequestSync).await {
                        return ConnectionEnd::Lost { reason: error.to_string() };
                    }
                }

                item = transport.recv() => match item {
                    Some(Ok(TransportItem::Message(raw))) => {
                        if let Some(end) = self.handle_frame(&raw).await {
                            return end;
                        }
                    }
                    Some(Ok(TransportItem::Closed(info))) => {
                        return if info.is_clean() {
                            info!(code = info.code, reason = %info.reason, "server closed the session");
                            ConnectionEnd::Finished {
                                reason: (!info.reason.is_empty()).then(|| info.reason.clone()),
                            }
                        } else {
                            ConnectionEnd::Lost {
                                reason: format!("close code {}: {}", info.code, info.reason),
                            }
                        };
                    }
                    Some(Err(error)) => {
                        return ConnectionEnd::Lost { reason: error.to_string() };
                    }
                    None => {
                        return ConnectionEnd::Lost {
                            reason: "transport stream ended".to_owned(),
                        };
                    }
                },
            }
        }
    }

    /// Handles one posted command while connected. Returns `Some` when it
    /// ends the connected phase.
    async fn handle_command(
        &mut self,
        transport: &mut C::Transport,
        command: Command,
    ) -> Option<ConnectionEnd> {
        match command {
            Command::Send(message) => {
                if let Err(err) = send_message(transport, &message).await {
                    // A message this crate built but cannot serialize is a
                    // bug, not a connection problem; keep the session up.
                    if matches!(err, ChalkcastError::Serialization(_)) {
                        error!("failed to serialize outgoing message: {err}");
                    } else {
                        return Some(ConnectionEnd::Lost {
                            reason: err.to_string(),
                        });
                    }
                }
                None
            }
            Command::Reconnect => {
                debug!("reconnect requested while connected; ignoring");
                None
            }
            Command::VisibilityRegained => {
                debug!("visibility regained while connected; nothing to do");
                None
            }
            Command::LookupResolved {
                generation,
                id,
                name,
            } => {
                if generation != self.generation {
                    debug!(id = %id, "dropping directory resolution from an earlier connection");
                    return None;
                }
                if self.presence.resolve_lookup(&id, name.as_deref()) {
                    self.roster_changed().await;
                }
                None
            }
        }
    }

    /// Parses and dispatches one inbound frame. Returns `Some` when the
    /// message ends the session.
    async fn handle_frame(&mut self, raw: &str) -> Option<ConnectionEnd> {
        match classify(raw) {
            Err(error) => {
                self.state.record_parse_failure();
                warn!(%error, "dropping malformed frame");
                None
            }
            // Heartbeats are connection liveness, not application state;
            // they stop here.
            Ok(Classified::KeepAlive) => None,
            Ok(Classified::Unknown { message_type }) => {
                debug!(message_type = %message_type, "ignoring unknown message type");
                None
            }
            Ok(Classified::Message(message)) => self.dispatch(message).await,
        }
    }

    /// Routes one parsed server message into the reconcilers and emits
    /// events for whatever actually changed.
    async fn dispatch(&mut self, message: ServerMessage) -> Option<ConnectionEnd> {
        match message {
            ServerMessage::UserJoined(payload) => {
                if self.presence.apply_joined(&payload) {
                    self.roster_changed().await;
                }
            }
            ServerMessage::UserLeft(UserLeftPayload { id })
            | ServerMessage::ParticipantKicked(ParticipantKickedPayload { id }) => {
                if self.presence.apply_left(&id) {
                    self.roster_changed().await;
                }
            }
            ServerMessage::UserStatusUpdate(payload) => {
                if self.presence.apply_status(&payload) {
                    self.roster_changed().await;
                }
            }
            ServerMessage::ParticipantsUpdated(payload) => {
                let outcome = self.presence.reconcile_ids(&payload.ids);
                self.spawn_lookups(outcome.lookups);
                if outcome.changed {
                    self.roster_changed().await;
                }
            }
            ServerMessage::ParticipantsList(payload) => {
                let outcome = self.presence.reconcile_records(&payload.participants);
                self.spawn_lookups(outcome.lookups);
                if outcome.changed {
                    self.roster_changed().await;
                }
            }
            ServerMessage::LobbyUpdated(payload) => {
                if self.progress.apply_phase(payload.status) {
                    self.publish_progress().await;
                    self.emit(ChalkcastEvent::PhaseChanged {
                        status: payload.status,
                    });
                }
            }
            ServerMessage::TestStarted => {
                if self.progress.apply_phase(LobbyStatus::InProgress) {
                    self.publish_progress().await;
                    self.emit(ChalkcastEvent::PhaseChanged {
                        status: LobbyStatus::InProgress,
                    });
                }
            }
            ServerMessage::TestFinished => {
                // The socket stays open after the test ends; the server
                // closes it with 1000 when the lobby winds down.
                if self.progress.apply_phase(LobbyStatus::Finished) {
                    self.publish_progress().await;
                    self.emit(ChalkcastEvent::PhaseChanged {
                        status: LobbyStatus::Finished,
                    });
                }
            }
            ServerMessage::NextQuestion(payload) | ServerMessage::CurrentQuestion(payload) => {
                match self.progress.apply_cursor(payload.index, &payload.id) {
                    CursorOutcome::Moved => {
                        self.publish_progress().await;
                        self.emit(ChalkcastEvent::QuestionChanged {
                            index: payload.index,
                            id: payload.id,
                        });
                    }
                    CursorOutcome::Duplicate => {
                        debug!(index = payload.index, id = %payload.id, "duplicate question push");
                    }
                    CursorOutcome::Stale => {
                        debug!(index = payload.index, id = %payload.id, "stale question push");
                    }
                }
            }
            ServerMessage::ShowCorrectAnswer(payload) => {
                if self.progress.apply_reveal(&payload) {
                    self.publish_progress().await;
                    self.emit(ChalkcastEvent::CorrectAnswerRevealed {
                        id: payload.id,
                        index: payload.index,
                        correct_index: payload.correct_index,
                    });
                }
            }
            ServerMessage::ToggleParticipantAnswers(payload) => {
                if self.progress.apply_visibility(payload.visible) {
                    self.publish_progress().await;
                    self.emit(ChalkcastEvent::AnswerVisibilityChanged {
                        visible: payload.visible,
                    });
                }
            }
            ServerMessage::AnswerReceived(payload) => {
                if self.progress.apply_full_answer(&payload) {
                    self.publish_answers().await;
                    self.emit(ChalkcastEvent::AnswerRecorded {
                        participant_id: payload.participant_id,
                        question_id: payload.question_id,
                    });
                }
            }
            ServerMessage::ParticipantAnswered(payload) => {
                if self
                    .progress
                    .apply_answered_marker(&payload.participant_id, &payload.question_id)
                {
                    self.publish_answers().await;
                    self.emit(ChalkcastEvent::AnswerRecorded {
                        participant_id: payload.participant_id,
                        question_id: payload.question_id,
                    });
                }
            }
            ServerMessage::SyncResponse(payload) => {
                let sync = self.progress.apply_sync(&payload);
                let bulk = self.presence.reconcile_records(&payload.participants);
                self.spawn_lookups(bulk.lookups);

                if sync.cursor_moved || sync.phase_changed {
                    self.publish_progress().await;
                }
                if sync.phase_changed {
                    self.emit(ChalkcastEvent::PhaseChanged {
                        status: payload.lobby_status,
                    });
                }
                if sync.cursor_moved {
                    // A snapshot can also clear the cursor; that shows up
                    // in the progress snapshot rather than as an event.
                    if let (Some(index), Some(id)) = (payload.index, payload.id.clone()) {
                        self.emit(ChalkcastEvent::QuestionChanged { index, id });
                    }
                }
                if bulk.changed {
                    self.roster_changed().await;
                }
            }
            ServerMessage::UserKicked(payload) => {
                info!(reason = ?payload.reason, "removed from lobby by the host");
                self.emit(ChalkcastEvent::Kicked {
                    reason: payload.reason.clone(),
                });
                return Some(ConnectionEnd::Finished {
                    reason: Some(
                        payload
                            .reason
                            .unwrap_or_else(|| "removed from lobby".to_owned()),
                    ),
                });
            }
            ServerMessage::LobbyClosed(payload) => {
                info!(reason = ?payload.reason, "lobby closed by the host");
                self.emit(ChalkcastEvent::LobbyClosed {
                    reason: payload.reason.clone(),
                });
                return Some(ConnectionEnd::Finished {
                    reason: Some(payload.reason.unwrap_or_else(|| "lobby closed".to_owned())),
                });
            }
        }
        None
    }

    /// Fires directory lookups for ids the roster knows nothing about.
    /// Resolutions come back through the command channel, pinned to the
    /// generation that requested them.
    fn spawn_lookups(&self, ids: Vec<ParticipantId>) {
        for id in ids {
            let directory = Arc::clone(&self.directory);
            let cmd_tx = self.cmd_tx.clone();
            let generation = self.generation;
            tokio::spawn(async move {
                let name = match directory.display_name(&id).await {
                    Ok(name) => name,
                    Err(error) => {
                        debug!(id = %id, %error, "participant directory lookup failed");
                        None
                    }
                };
                let _ = cmd_tx.send(Command::LookupResolved {
                    generation,
                    id,
                    name,
                });
            });
        }
    }

    // ── Snapshots and events ────────────────────────────────────

    /// Publishes the roster snapshot and emits the change event.
    async fn roster_changed(&mut self) {
        let roster = self.presence.roster();
        self.state.publish_roster(roster.clone()).await;
        self.emit(ChalkcastEvent::RosterChanged { roster });
    }

    async fn publish_progress(&mut self) {
        self.state.publish_progress(self.progress.progress()).await;
    }

    async fn publish_answers(&mut self) {
        self.state.publish_answers(self.progress.answers()).await;
    }

    /// Emits an event, dropping it when the consumer lags. The terminal
    /// `Disconnected` never goes through here.
    fn emit(&self, event: ChalkcastEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("event channel full; dropping event: {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed; consumer is gone");
            }
        }
    }

    /// Delivers the terminal event, awaiting channel capacity if needed.
    async fn emit_terminal(&self, event: ChalkcastEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("event channel closed before the terminal event");
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Serializes and sends one message on the transport.
async fn send_message<T: Transport>(
    transport: &mut T,
    message: &ClientMessage,
) -> Result<(), ChalkcastError> {
    let raw = serde_json::to_string(message)?;
    transport.send(raw).await
}

/// Ticks the periodic resync interval when one is configured; pends
/// forever otherwise so the select arm never fires.
async fn tick_opt(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
