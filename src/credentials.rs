//! Socket credentials and the single-flight fetch cache.
//!
//! Lobby sockets authenticate with a short-lived token that must be fetched
//! fresh before every connect. [`CredentialProvider`] is the seam: the
//! [`http`](crate::http) module ships the production implementation, tests
//! plug in scripted ones.
//!
//! [`CredentialCache`] collapses concurrent fetches into one provider call.
//! Callers that arrive while a fetch is in flight await the same future
//! instead of issuing a duplicate request; the cached future is cleared as
//! soon as it resolves, so the next fetch always hits the provider again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::error::{ChalkcastError, Result};

// ── Credential ──────────────────────────────────────────────────────────

/// A freshly issued socket credential: the token and the URL it authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Short-lived token scoped to one lobby. Single use in practice; the
    /// server rejects reuse after a disconnect.
    pub token: String,
    /// Fully formed WebSocket URL carrying the token, ready to dial.
    pub socket_url: String,
}

/// Issues socket credentials.
///
/// Implementations are called once per connection attempt (the cache takes
/// care of deduplication). Errors are retried by the reconnect loop with
/// the same backoff as transport failures.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    /// Fetch a fresh credential.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::Credential`] (or any other variant) when
    /// the credential cannot be issued; the caller treats every error the
    /// same way.
    async fn fetch(&self) -> Result<Credential>;
}

// ── Single-flight cache ─────────────────────────────────────────────────

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Credential, String>>>;

/// Collapses concurrent credential fetches into a single provider call.
///
/// The cache never stores a resolved credential: tokens are single-use, so
/// only the *in-flight* future is shared. Once it resolves, the slot is
/// cleared and the next [`fetch`](CredentialCache::fetch) starts fresh.
pub struct CredentialCache<P: ?Sized> {
    provider: Arc<P>,
    inflight: Mutex<Option<(u64, SharedFetch)>>,
    next_tag: AtomicU64,
}

impl<P: CredentialProvider + ?Sized> CredentialCache<P> {
    /// Wraps a provider in a single-flight cache.
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            inflight: Mutex::new(None),
            next_tag: AtomicU64::new(0),
        }
    }

    /// Fetch a credential, joining an in-flight fetch when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ChalkcastError::Credential`] when the underlying provider
    /// fails. Joined callers observe the same error as the initiator.
    pub async fn fetch(&self) -> Result<Credential> {
        let (tag, fut) = {
            let mut slot = self.inflight.lock().await;
            match slot.as_ref() {
                Some((tag, fut)) => (*tag, fut.clone()),
                None => {
                    let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
                    let provider = Arc::clone(&self.provider);
                    let fut = async move {
                        provider.fetch().await.map_err(|error| match error {
                            // Avoid double-wrapping the message below.
                            ChalkcastError::Credential(message) => message,
                            other => other.to_string(),
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some((tag, fut.clone()));
                    (tag, fut)
                }
            }
        };

        let result = fut.await;

        // Clear the slot, but only if it still holds *our* fetch. A newer
        // fetch may already be in flight by the time a joined caller wakes.
        let mut slot = self.inflight.lock().await;
        if matches!(slot.as_ref(), Some((stored, _)) if *stored == tag) {
            *slot = None;
        }
        drop(slot);

        result.map_err(ChalkcastError::Credential)
    }
}

impl<P: ?Sized> std::fmt::Debug for CredentialCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache").finish_non_exhaustive()
    }
}

// ── Socket URL construction ─────────────────────────────────────────────

/// Builds the lobby socket URL from an HTTP(S) base URL.
///
/// `http` maps to `ws`, `https` to `wss`; a base that is already `ws` or
/// `wss` is kept as-is. The token rides in the query string, which is how
/// the lobby server expects it.
///
/// # Errors
///
/// Returns [`ChalkcastError::InvalidUrl`] when the base URL carries no
/// recognized scheme.
pub fn lobby_socket_url(base_url: &str, lobby_id: &str, token: &str) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        base.to_owned()
    } else {
        return Err(ChalkcastError::InvalidUrl(format!(
            "unsupported scheme in base URL: {base_url}"
        )));
    };
    Ok(format!("{ws_base}/ws/lobby/{lobby_id}?token={token}"))
}

// ── Tests ───────────────────────────────────────────────────────────────
