//! Consumer-facing session events.
//!
//! [`ChalkcastEvent`]s are emitted on the bounded channel returned from
//! [`ChalkcastClient::start`](crate::client::ChalkcastClient::start). They
//! describe *derived* state changes — the reconcilers have already applied
//! their duplicate/stale filtering, so a `QuestionChanged` is emitted at
//! most once per cursor move no matter how many times the server repeats
//! the push.
//!
//! Delivery: every event except [`Disconnected`](ChalkcastEvent::Disconnected)
//! is dropped (with a warning) when the consumer falls behind.
//! `Disconnected` is terminal, always delivered, and always the last event
//! on the channel.

use std::time::Duration;

use crate::presence::Participant;
use crate::protocol::{LobbyStatus, ParticipantId, QuestionId};

/// Events emitted by the session task.
#[derive(Debug, Clone, PartialEq)]
pub enum ChalkcastEvent {
    /// The transport opened and the post-connect resync was requested.
    /// Emitted for the first connect and for every reconnect.
    Connected {
        /// Connection epoch within this session; increments on every open.
        generation: u64,
    },

    /// The transport ended unexpectedly (error, non-clean close code, or
    /// stream end). A reconnect will be scheduled unless the attempt
    /// budget is exhausted.
    ConnectionLost {
        /// Human-readable description of what ended the connection.
        reason: String,
    },

    /// A reconnect attempt was scheduled after a backoff delay.
    ReconnectScheduled {
        /// Which consecutive attempt this will be (1-based).
        attempt: u32,
        /// How long the orchestrator waits before dialing.
        delay: Duration,
    },

    /// Automatic reconnection gave up after exhausting the attempt budget.
    /// The session stays alive: a manual
    /// [`reconnect`](crate::client::ChalkcastClient::reconnect) resets the
    /// counter and tries again.
    ReconnectFailed {
        /// Consecutive failures at the time the orchestrator gave up.
        attempts: u32,
    },

    /// The participant roster changed (join, leave, status flip, bulk
    /// reconcile, or a lazy name resolution landing).
    RosterChanged {
        /// Snapshot of the full roster, ordered by participant id.
        roster: Vec<Participant>,
    },

    /// The lobby moved to a new lifecycle phase.
    PhaseChanged {
        /// The phase now in effect.
        status: LobbyStatus,
    },

    /// The question cursor moved. Never emitted for duplicate or stale
    /// pushes; a post-reconnect sync may move it backward.
    QuestionChanged {
        /// Zero-based position of the question now active.
        index: usize,
        /// Server-issued id of the question now active.
        id: QuestionId,
    },

    /// The host revealed the correct answer for the current question.
    CorrectAnswerRevealed {
        id: QuestionId,
        index: usize,
        /// Which choice is correct, when the server shares it.
        correct_index: Option<usize>,
    },

    /// The host toggled whether participants can see each other's answers.
    AnswerVisibilityChanged { visible: bool },

    /// An answer record was created or upgraded for (participant, question).
    AnswerRecorded {
        participant_id: ParticipantId,
        question_id: QuestionId,
    },

    /// This client was removed from the lobby by the host. The session
    /// ends; a `Disconnected` event follows.
    Kicked { reason: Option<String> },

    /// The host closed the lobby. The session ends; a `Disconnected`
    /// event follows.
    LobbyClosed { reason: Option<String> },

    /// The session ended. Always the last event on the channel.
    Disconnected {
        /// Why the session ended, when known.
        reason: Option<String>,
    },
}
