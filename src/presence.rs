//! Roster reconciliation.
//!
//! The lobby server describes presence three ways: incremental events
//! (join/leave/status), bulk id lists, and bulk participant records. The
//! [`PresenceReconciler`] folds all of them into one ordered roster and
//! filters out the garbage the server is known to emit — empty names,
//! placeholder names, and repeated bulk lists.
//!
//! The reconciler is synchronous and single-writer by construction; the
//! session task owns it and is the only mutator. Directory lookups for
//! bare ids are *requested* here (returned from the bulk methods) but
//! performed elsewhere, so reconciliation never blocks.

use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::{ParticipantId, ParticipantRecord, UserJoinedPayload, UserStatusPayload};

/// Names the server substitutes when it has nothing better. A roster entry
/// is never created from one, and a learned name is never replaced by one.
const PLACEHOLDER_NAMES: &[&str] = &["unknown", "unknown user"];

/// A materialized roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub online: bool,
    pub is_host: bool,
}

/// Result of applying a bulk membership update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Whether the roster changed at all.
    pub changed: bool,
    /// Ids that need a directory lookup before they can materialize.
    /// Already-pending ids are not repeated.
    pub lookups: Vec<ParticipantId>,
}

/// Folds presence messages into an ordered roster.
#[derive(Debug, Default)]
pub struct PresenceReconciler {
    roster: BTreeMap<ParticipantId, Participant>,
    pending_lookups: BTreeSet<ParticipantId>,
}

/// Returns the trimmed name when it is usable as a display name.
fn valid_display_name(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if PLACEHOLDER_NAMES.contains(&lower.as_str()) {
        return None;
    }
    Some(trimmed)
}

impl PresenceReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Incremental events ──────────────────────────────────────────

    /// Applies a join. New entries require a usable name; a join for a
    /// known id refreshes it in place, keeping the old name when the new
    /// one is a placeholder. Returns whether the roster changed.
    pub fn apply_joined(&mut self, payload: &UserJoinedPayload) -> bool {
        let name = valid_display_name(&payload.name);
        if let Some(existing) = self.roster.get_mut(&payload.id) {
            let mut changed = false;
            if let Some(name) = name {
                if existing.name != name {
                    existing.name = name.to_owned();
                    changed = true;
                }
            }
            if !existing.online {
                existing.online = true;
                changed = true;
            }
            if existing.is_host != payload.is_host {
                existing.is_host = payload.is_host;
                changed = true;
            }
            return changed;
        }

        let Some(name) = name else {
            tracing::debug!(id = %payload.id, "dropping join without a usable name");
            return false;
        };
        self.pending_lookups.remove(&payload.id);
        self.roster.insert(
            payload.id.clone(),
            Participant {
                id: payload.id.clone(),
                name: name.to_owned(),
                online: true,
                is_host: payload.is_host,
            },
        );
        true
    }

    /// Removes a participant. Removal is unconditional; the server is
    /// authoritative about who is gone. Returns whether an entry existed.
    pub fn apply_left(&mut self, id: &str) -> bool {
        self.pending_lookups.remove(id);
        self.roster.remove(id).is_some()
    }

    /// Applies an online/offline flip. An unknown id materializes only
    /// when the event carries a usable name. Returns whether the roster
    /// changed.
    pub fn apply_status(&mut self, payload: &UserStatusPayload) -> bool {
        let online = payload.status.is_online();
        let name = payload.name.as_deref().and_then(valid_display_name);

        if let Some(existing) = self.roster.get_mut(&payload.id) {
            let mut changed = false;
            if existing.online != online {
                existing.online = online;
                changed = true;
            }
            if let Some(name) = name {
                if existing.name != name {
                    existing.name = name.to_owned();
                    changed = true;
                }
            }
            return changed;
        }

        let Some(name) = name else {
            tracing::debug!(id = %payload.id, "status change for unknown participant without a name");
            return false;
        };
        self.pending_lookups.remove(&payload.id);
        self.roster.insert(
            payload.id.clone(),
            Participant {
                id: payload.id.clone(),
                name: name.to_owned(),
                online,
                is_host: false,
            },
        );
        true
    }

    // ── Bulk reconciliation ─────────────────────────────────────────

    /// Reconciles against an authoritative list of member ids. Entries
    /// absent from the list are dropped; unknown ids are queued for a
    /// directory lookup. Applying the same list twice is a no-op.
    pub fn reconcile_ids(&mut self, ids: &[ParticipantId]) -> BulkOutcome {
        let members: BTreeSet<&ParticipantId> = ids.iter().collect();
        let mut outcome = BulkOutcome::default();

        let before = self.roster.len();
        self.roster.retain(|id, _| members.contains(id));
        outcome.changed = self.roster.len() != before;
        self.pending_lookups.retain(|id| members.contains(id));

        for id in ids {
            if !self.roster.contains_key(id) && self.pending_lookups.insert(id.clone()) {
                outcome.lookups.push(id.clone());
            }
        }
        outcome
    }

    /// Reconciles against an authoritative list of participant records.
    /// Records with usable names upsert directly; the rest behave like
    /// bare ids and go through the lookup path.
    pub fn reconcile_records(&mut self, records: &[ParticipantRecord]) -> BulkOutcome {
        let members: BTreeSet<&ParticipantId> = records.iter().map(|r| &r.id).collect();
        let mut outcome = BulkOutcome::default();

        let before = self.roster.len();
        self.roster.retain(|id, _| members.contains(id));
        outcome.changed = self.roster.len() != before;
        self.pending_lookups.retain(|id| members.contains(id));

        for record in records {
            let name = record.name.as_deref().and_then(valid_display_name);
            match (self.roster.get_mut(&record.id), name) {
                (Some(existing), name) => {
                    if let Some(name) = name {
                        if existing.name != name {
                            existing.name = name.to_owned();
                            outcome.changed = true;
                        }
                    }
                    if existing.online != record.online {
                        existing.online = record.online;
                        outcome.changed = true;
                    }
                    if existing.is_host != record.is_host {
                        existing.is_host = record.is_host;
                        outcome.changed = true;
                    }
                }
                (None, Some(name)) => {
                    self.pending_lookups.remove(&record.id);
                    self.roster.insert(
                        record.id.clone(),
                        Participant {
                            id: record.id.clone(),
                            name: name.to_owned(),
                            online: record.online,
                            is_host: record.is_host,
                        },
                    );
                    outcome.changed = true;
                }
                (None, None) => {
                    if self.pending_lookups.insert(record.id.clone()) {
                        outcome.lookups.push(record.id.clone());
                    }
                }
            }
        }
        outcome
    }

    // ── Lookup resolution ───────────────────────────────────────────

    /// Applies the result of a directory lookup. Ignored unless the id is
    /// still pending; the participant may have left, materialized through
    /// a join, or belong to an earlier connection. Returns whether the
    /// roster changed.
    pub fn resolve_lookup(&mut self, id: &str, name: Option<&str>) -> bool {
        if !self.pending_lookups.remove(id) {
            return false;
        }
        if self.roster.contains_key(id) {
            return false;
        }
        let Some(name) = name.and_then(valid_display_name) else {
            // The id stays out of the roster; the next bulk update will
            // queue the lookup again.
            return false;
        };
        self.roster.insert(
            id.to_owned(),
            Participant {
                id: id.to_owned(),
                name: name.to_owned(),
                online: true,
                is_host: false,
            },
        );
        true
    }

    /// Forgets in-flight lookups. Called on reconnect: resolutions from
    /// the previous connection must not leak into the new roster.
    pub fn clear_pending_lookups(&mut self) {
        self.pending_lookups.clear();
    }

    // ── Snapshots ───────────────────────────────────────────────────

    /// The roster, ordered by participant id.
    pub fn roster(&self) -> Vec<Participant> {
        self.roster.values().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.roster.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Number of ids waiting on a directory lookup.
    pub fn pending_lookup_count(&self) -> usize {
        self.pending_lookups.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
