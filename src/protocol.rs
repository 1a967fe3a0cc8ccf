//! Wire types for the Chalkcast lobby protocol.
//!
//! Every frame on the socket is a discriminated envelope
//! `{"type": <string>, "data": <object>}`. Outbound messages serialize
//! straight from [`ClientMessage`]; inbound frames are parsed in two
//! stages (envelope, then per-type payload) by [`crate::router`] so that
//! unknown types can be skipped without failing the whole frame.
//!
//! Timestamps ride as the server's ISO 8601 strings, uninterpreted.

use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for participants. Opaque server-issued string.
pub type ParticipantId = String;

/// Unique identifier for questions. Opaque server-issued string.
pub type QuestionId = String;

/// Unique identifier for lobbies.
pub type LobbyId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle phase of a lobby, as reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    /// Participants are gathering; the test has not started.
    #[default]
    Waiting,
    /// The host is advancing through questions.
    InProgress,
    /// The test has ended. Terminal.
    Finished,
}

impl LobbyStatus {
    /// Position in the `Waiting → InProgress → Finished` progression,
    /// used to reject backward phase pushes.
    pub(crate) fn rank(self) -> u8 {
        match self {
            LobbyStatus::Waiting => 0,
            LobbyStatus::InProgress => 1,
            LobbyStatus::Finished => 2,
        }
    }
}

/// Presence status carried by `user_status_update`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn is_online(self) -> bool {
        matches!(self, PresenceStatus::Online)
    }
}

// ── Inbound envelope ────────────────────────────────────────────────

/// First-stage parse of an inbound frame: the discriminant plus the
/// still-raw payload.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Message discriminant, e.g. `"user_joined"`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Raw payload; absent for bare frames such as `{"type":"heartbeat"}`.
    #[serde(default)]
    pub data: serde_json::Value,
}

// ── Inbound payloads ────────────────────────────────────────────────

/// Payload of `user_joined`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserJoinedPayload {
    pub id: ParticipantId,
    pub name: String,
    #[serde(default)]
    pub is_host: bool,
}

/// Payload of `user_left`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserLeftPayload {
    pub id: ParticipantId,
}

/// Payload of `user_status_update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStatusPayload {
    pub id: ParticipantId,
    pub status: PresenceStatus,
    /// Display name, when the server includes it alongside the status flip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Payload of `participants_updated`: the authoritative id set, names not
/// included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantIdsPayload {
    pub ids: Vec<ParticipantId>,
}

/// Payload of `participants_list`: the authoritative roster with full
/// records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantListPayload {
    pub participants: Vec<ParticipantRecord>,
}

/// One participant as the server serializes it in bulk lists and sync
/// snapshots. Fields beyond the id are lenient: older server builds omit
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_online")]
    pub online: bool,
    #[serde(default)]
    pub is_host: bool,
}

fn default_online() -> bool {
    true
}

/// Payload of `lobby_updated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbyUpdatedPayload {
    pub status: LobbyStatus,
}

/// Payload of `lobby_closed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LobbyClosedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `next_question` and `current_question`: the host's question
/// cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionCursorPayload {
    pub index: usize,
    pub id: QuestionId,
}

/// Payload of `sync_response`: the authoritative session snapshot returned
/// for a `request_sync`. Cursor fields are absent while the lobby is still
/// waiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSnapshotPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<QuestionId>,
    pub lobby_status: LobbyStatus,
    #[serde(default)]
    pub participants: Vec<ParticipantRecord>,
}

/// Payload of `show_correct_answer`. `id` and `index` name the question the
/// reveal belongs to; a reveal for any other cursor position is stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevealAnswerPayload {
    pub id: QuestionId,
    pub index: usize,
    /// Which choice is correct, when the server shares it with clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<usize>,
}

/// Payload of `toggle_participant_answers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerVisibilityPayload {
    pub visible: bool,
}

/// Payload of `answer_received`: a full answer record. `answer_index` may
/// still be absent when the server redacts choices for non-hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerReceivedPayload {
    pub participant_id: ParticipantId,
    pub question_id: QuestionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
}

/// Payload of `participant_answered`: presence-only notice that someone
/// answered, with no choice attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantAnsweredPayload {
    pub participant_id: ParticipantId,
    pub question_id: QuestionId,
}

/// Payload of `user_kicked`: this client was removed from the lobby.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserKickedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `participant_kicked`: another participant was removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantKickedPayload {
    pub id: ParticipantId,
}

// ── Typed inbound messages ──────────────────────────────────────────

/// A fully parsed inbound message, produced by [`crate::router::classify`].
///
/// Keep-alive frames never appear here; they are consumed by the
/// connection layer before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    UserJoined(UserJoinedPayload),
    UserLeft(UserLeftPayload),
    UserStatusUpdate(UserStatusPayload),
    ParticipantsUpdated(ParticipantIdsPayload),
    ParticipantsList(ParticipantListPayload),
    LobbyUpdated(LobbyUpdatedPayload),
    LobbyClosed(LobbyClosedPayload),
    TestStarted,
    NextQuestion(QuestionCursorPayload),
    CurrentQuestion(QuestionCursorPayload),
    SyncResponse(SyncSnapshotPayload),
    ShowCorrectAnswer(RevealAnswerPayload),
    ToggleParticipantAnswers(AnswerVisibilityPayload),
    AnswerReceived(AnswerReceivedPayload),
    ParticipantAnswered(ParticipantAnsweredPayload),
    TestFinished,
    UserKicked(UserKickedPayload),
    ParticipantKicked(ParticipantKickedPayload),
}

// ── Outbound messages ───────────────────────────────────────────────

/// Messages the client sends to the server.
///
/// Serializes to the same `{"type", "data"}` envelope the server speaks;
/// unit variants omit the `data` key entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the authoritative session snapshot (`sync_response`).
    RequestSync,
    /// Ask for the authoritative roster (`participants_list`).
    RequestParticipants,
    /// Ask for the current question cursor (`current_question`).
    RequestCurrentQuestion,
    /// Ask for the lobby phase (`lobby_updated`).
    RequestLobbyStatus,
    /// Application-level keep-alive, sent on a fixed interval by the
    /// connection layer.
    Heartbeat,
    /// Submit this participant's answer to a question.
    SubmitAnswer {
        question_id: QuestionId,
        answer_index: usize,
    },
    /// Host intent: advance to the next question.
    AdvanceQuestion,
    /// Host intent: remove a participant from the lobby.
    KickParticipant { id: ParticipantId },
}
