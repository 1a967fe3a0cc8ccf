//! Participant directory lookups.
//!
//! Bulk roster updates sometimes carry bare participant ids. The session
//! resolves those to display names through a [`ParticipantDirectory`] so
//! the roster never shows placeholder entries. Lookups run off the session
//! task; a slow directory can never stall message handling.

use async_trait::async_trait;

use crate::error::Result;

/// Resolves participant ids to display names.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync + 'static {
    /// Look up the display name for `id`.
    ///
    /// `Ok(None)` means the directory has no such participant; the roster
    /// entry stays unmaterialized until a later bulk update retriggers the
    /// lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::Directory`](crate::error::ChalkcastError::Directory)
    /// when the lookup itself fails. Failures are treated like `Ok(None)`
    /// by the session, so implementations may also just swallow transient
    /// errors and return `Ok(None)` directly.
    async fn display_name(&self, id: &str) -> Result<Option<String>>;
}

/// A directory that knows nobody.
///
/// Useful when the deployment has no profile service: participants that
/// arrive as bare ids simply stay off the roster until a join or a bulk
/// record carries their name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDirectory;

#[async_trait]
impl ParticipantDirectory for NullDirectory {
    async fn display_name(&self, _id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}
