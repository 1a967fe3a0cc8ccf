//! Test progress and answer-state synchronization.
//!
//! Push traffic from the lobby server is at-least-once and can interleave
//! across reconnects, so the raw stream contains duplicates and stale
//! frames. The [`ProgressSynchronizer`] enforces exactly-once semantics on
//! top of it: the question cursor only moves forward on pushes, reveals
//! are dropped unless they match the current question, and answer records
//! merge richest-data-wins.
//!
//! The one exception is [`apply_sync`](ProgressSynchronizer::apply_sync):
//! a pulled snapshot is authoritative and replaces the cursor wholesale,
//! backward jumps included. That is the recovery path after a reconnect.

use std::collections::HashMap;

use crate::protocol::{
    AnswerReceivedPayload, LobbyStatus, ParticipantId, QuestionId, RevealAnswerPayload,
    SyncSnapshotPayload,
};

// ── State ───────────────────────────────────────────────────────────────

/// Where the test session currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressState {
    /// Zero-based cursor, `None` before the first question arrives.
    pub question_index: Option<usize>,
    /// Server id of the question under the cursor.
    pub question_id: Option<QuestionId>,
    /// Lifecycle phase; pushes only move it forward, sync sets it freely.
    pub lobby_status: LobbyStatus,
    /// Whether the correct answer for the current question was revealed.
    pub correct_answer_revealed: bool,
    /// Whether participants can see each other's answers.
    pub participant_answers_visible: bool,
}

/// Everything known about one participant's answer to one question.
///
/// A record may start as a bare `answered` marker and be upgraded later by
/// a full record; it is never downgraded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnswerRecord {
    pub answer_index: Option<usize>,
    pub is_correct: Option<bool>,
    pub answered: bool,
    /// Server-side submission time, ISO-8601, uninterpreted.
    pub submitted_at: Option<String>,
}

/// What a cursor push did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOutcome {
    /// The cursor moved forward; reveal flags were reset.
    Moved,
    /// Same index as the current cursor; ignored.
    Duplicate,
    /// Behind the current cursor; dropped.
    Stale,
}

/// What applying a sync snapshot changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    pub cursor_moved: bool,
    pub phase_changed: bool,
}

// ── Synchronizer ────────────────────────────────────────────────────────

/// Folds progress pushes and sync snapshots into a consistent view.
#[derive(Debug, Default)]
pub struct ProgressSynchronizer {
    progress: ProgressState,
    answers: HashMap<(ParticipantId, QuestionId), AnswerRecord>,
}

impl ProgressSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a pushed question cursor (`next_question` or a
    /// `current_question` push). Forward moves reset both reveal flags;
    /// duplicates and stale indexes leave everything untouched.
    pub fn apply_cursor(&mut self, index: usize, id: &QuestionId) -> CursorOutcome {
        if let Some(current) = self.progress.question_index {
            if index == current {
                return CursorOutcome::Duplicate;
            }
            if index < current {
                return CursorOutcome::Stale;
            }
        }
        self.progress.question_index = Some(index);
        self.progress.question_id = Some(id.clone());
        self.progress.correct_answer_revealed = false;
        self.progress.participant_answers_visible = false;
        CursorOutcome::Moved
    }

    /// Pushes the lifecycle phase forward. Backward pushes are stale and
    /// dropped. Returns whether the phase changed.
    pub fn apply_phase(&mut self, status: LobbyStatus) -> bool {
        if status.rank() <= self.progress.lobby_status.rank() {
            return false;
        }
        self.progress.lobby_status = status;
        true
    }

    /// Applies a correct-answer reveal. Only lands when `(id, index)`
    /// matches the current cursor exactly; a reveal for a question the
    /// session already advanced past is dropped. Returns whether the flag
    /// flipped.
    pub fn apply_reveal(&mut self, payload: &RevealAnswerPayload) -> bool {
        let matches_cursor = self.progress.question_index == Some(payload.index)
            && self.progress.question_id.as_ref() == Some(&payload.id);
        if !matches_cursor {
            tracing::debug!(
                id = %payload.id,
                index = payload.index,
                "dropping reveal for a question that is not current"
            );
            return false;
        }
        if self.progress.correct_answer_revealed {
            return false;
        }
        self.progress.correct_answer_revealed = true;
        true
    }

    /// Sets whether participant answers are visible. Returns whether the
    /// flag changed.
    pub fn apply_visibility(&mut self, visible: bool) -> bool {
        if self.progress.participant_answers_visible == visible {
            return false;
        }
        self.progress.participant_answers_visible = visible;
        true
    }

    /// Merges a full answer record. A record carrying a concrete
    /// `answer_index` replaces whatever is stored; one without an index
    /// only fills gaps, so richer data is never discarded for poorer.
    /// Returns whether the stored record changed.
    pub fn apply_full_answer(&mut self, payload: &AnswerReceivedPayload) -> bool {
        let key = (payload.participant_id.clone(), payload.question_id.clone());
        let entry = self.answers.entry(key).or_default();
        let before = entry.clone();

        entry.answered = true;
        if payload.answer_index.is_some() {
            entry.answer_index = payload.answer_index;
            entry.is_correct = payload.is_correct;
            entry.submitted_at = payload.submitted_at.clone();
        } else if entry.answer_index.is_none() {
            if payload.is_correct.is_some() {
                entry.is_correct = payload.is_correct;
            }
            if payload.submitted_at.is_some() {
                entry.submitted_at = payload.submitted_at.clone();
            }
        }
        *entry != before
    }

    /// Records that a participant answered, without revealing what. Never
    /// downgrades an existing record. Returns whether anything changed.
    pub fn apply_answered_marker(
        &mut self,
        participant_id: &ParticipantId,
        question_id: &QuestionId,
    ) -> bool {
        let key = (participant_id.clone(), question_id.clone());
        let entry = self.answers.entry(key).or_default();
        if entry.answered {
            return false;
        }
        entry.answered = true;
        true
    }

    /// Applies a pulled snapshot. The cursor is replaced wholesale — this
    /// is the only path that may move it backward or clear it — and the
    /// reveal flags reset when it actually moves. The phase is set to
    /// whatever the server reports. Answer records are left alone.
    pub fn apply_sync(&mut self, snapshot: &SyncSnapshotPayload) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();

        if self.progress.question_index != snapshot.index
            || self.progress.question_id != snapshot.id
        {
            self.progress.question_index = snapshot.index;
            self.progress.question_id = snapshot.id.clone();
            self.progress.correct_answer_revealed = false;
            self.progress.participant_answers_visible = false;
            outcome.cursor_moved = true;
        }

        if self.progress.lobby_status != snapshot.lobby_status {
            self.progress.lobby_status = snapshot.lobby_status;
            outcome.phase_changed = true;
        }
        outcome
    }

    // ── Snapshots ───────────────────────────────────────────────────

    pub fn progress(&self) -> ProgressState {
        self.progress.clone()
    }

    pub fn answers(&self) -> HashMap<(ParticipantId, QuestionId), AnswerRecord> {
        self.answers.clone()
    }

    pub fn answer(&self, participant_id: &str, question_id: &str) -> Option<&AnswerRecord> {
        self.answers
            .get(&(participant_id.to_owned(), question_id.to_owned()))
    }

    /// How many participants answered the given question.
    pub fn answered_count(&self, question_id: &str) -> usize {
        self.answers
            .iter()
            .filter(|((_, qid), record)| qid == question_id && record.answered)
            .count()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
