//! Inbound frame classification.
//!
//! Every frame is parsed in two stages: the envelope (`type` plus raw
//! `data`), then the payload for the matched type. Splitting the stages
//! keeps unknown message types from failing the parse — the server adds
//! types over time and older clients must skate past them.
//!
//! [`classify`] is pure; logging and the parse-failure counter live with
//! the caller so one bad frame can be dropped without ending the session.

use crate::protocol::{Envelope, ServerMessage};

/// Outcome of classifying one raw frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A recognized message, parsed and ready for dispatch.
    Message(ServerMessage),
    /// An application-level keep-alive. Consumed by the connection layer,
    /// never dispatched to handlers.
    KeepAlive,
    /// A well-formed envelope whose type this client does not know.
    Unknown {
        /// The unrecognized discriminant, for logging.
        message_type: String,
    },
}

/// Parse one raw frame into a [`Classified`] outcome.
///
/// Errors cover both malformed envelopes and payloads that do not match
/// their declared type; the caller reports them to its error sink and
/// moves on to the next frame.
pub fn classify(raw: &str) -> Result<Classified, serde_json::Error> {
    let Envelope { message_type, data } = serde_json::from_str(raw)?;
    let message = match message_type.as_str() {
        "heartbeat" => return Ok(Classified::KeepAlive),
        "user_joined" => ServerMessage::UserJoined(serde_json::from_value(data)?),
        "user_left" => ServerMessage::UserLeft(serde_json::from_value(data)?),
        "user_status_update" => ServerMessage::UserStatusUpdate(serde_json::from_value(data)?),
        "participants_updated" => {
            ServerMessage::ParticipantsUpdated(serde_json::from_value(data)?)
        }
        "participants_list" => ServerMessage::ParticipantsList(serde_json::from_value(data)?),
        "lobby_updated" => ServerMessage::LobbyUpdated(serde_json::from_value(data)?),
        "lobby_closed" => ServerMessage::LobbyClosed(serde_json::from_value(data)?),
        "test_started" => ServerMessage::TestStarted,
        "next_question" => ServerMessage::NextQuestion(serde_json::from_value(data)?),
        "current_question" => ServerMessage::CurrentQuestion(serde_json::from_value(data)?),
        "sync_response" => ServerMessage::SyncResponse(serde_json::from_value(data)?),
        "show_correct_answer" => ServerMessage::ShowCorrectAnswer(serde_json::from_value(data)?),
        "toggle_participant_answers" => {
            ServerMessage::ToggleParticipantAnswers(serde_json::from_value(data)?)
        }
        "answer_received" => ServerMessage::AnswerReceived(serde_json::from_value(data)?),
        "participant_answered" => {
            ServerMessage::ParticipantAnswered(serde_json::from_value(data)?)
        }
        "test_finished" => ServerMessage::TestFinished,
        "user_kicked" => ServerMessage::UserKicked(serde_json::from_value(data)?),
        "participant_kicked" => ServerMessage::ParticipantKicked(serde_json::from_value(data)?),
        _ => return Ok(Classified::Unknown { message_type }),
    };
    Ok(Classified::Message(message))
}

// ── Tests ───────────────────────────────────────────────────────────
