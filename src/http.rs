//! HTTP implementations of the credential and directory seams, speaking
//! the Chalkcast server's REST endpoints. Enabled by the `http-api`
//! feature.
//!
//! Every endpoint wraps its payload in `{"status": "ok", "data": {...}}`;
//! anything else is treated as a failure of the operation in question.

use async_trait::async_trait;
use serde::Deserialize;

use crate::client::ChalkcastConfig;
use crate::credentials::{lobby_socket_url, Credential, CredentialProvider};
use crate::directory::ParticipantDirectory;
use crate::error::{ChalkcastError, Result};
use crate::protocol::LobbyId;

/// Response envelope shared by all Chalkcast REST endpoints.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: String,
    // A missing `data` already parses as `None`; a bare `serde(default)`
    // here would put a `T: Default` bound on the derived impl.
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    name: Option<String>,
}

// ── Credential provider ─────────────────────────────────────────────

/// Fetches socket credentials from
/// `POST {base}/api/lobbies/{lobby}/socket-token`.
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    base_url: String,
    lobby_id: LobbyId,
}

impl HttpCredentialProvider {
    /// Creates a provider for the given server and lobby.
    pub fn new(base_url: impl Into<String>, lobby_id: impl Into<LobbyId>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            lobby_id: lobby_id.into(),
        }
    }

    /// Creates a provider for the server and lobby named in `config`.
    pub fn from_config(config: &ChalkcastConfig) -> Self {
        Self::new(config.base_url.clone(), config.lobby_id.clone())
    }

    /// Uses a caller-supplied `reqwest` client (custom TLS, proxies,
    /// request timeouts).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> Result<Credential> {
        let url = format!(
            "{}/api/lobbies/{}/socket-token",
            self.base_url.trim_end_matches('/'),
            self.lobby_id
        );
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|error| ChalkcastError::Credential(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChalkcastError::Credential(format!(
                "token endpoint returned {status}"
            )));
        }

        let body: ApiEnvelope<TokenData> = response
            .json()
            .await
            .map_err(|error| ChalkcastError::Credential(error.to_string()))?;
        if body.status != "ok" {
            return Err(ChalkcastError::Credential(format!(
                "token endpoint returned status {:?}",
                body.status
            )));
        }
        let token = body
            .data
            .ok_or_else(|| ChalkcastError::Credential("token endpoint returned no data".into()))?
            .token;

        let socket_url = lobby_socket_url(&self.base_url, &self.lobby_id, &token)?;
        Ok(Credential { token, socket_url })
    }
}

// ── Participant directory ───────────────────────────────────────────

/// Resolves display names from `GET {base}/api/participants/{id}`.
///
/// A 404 means the participant does not exist and maps to `Ok(None)`;
/// other non-success statuses are lookup failures.
#[derive(Debug, Clone)]
pub struct HttpParticipantDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpParticipantDirectory {
    /// Creates a directory backed by the given server.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Uses a caller-supplied `reqwest` client.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ParticipantDirectory for HttpParticipantDirectory {
    async fn display_name(&self, id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/api/participants/{id}",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| ChalkcastError::Directory(error.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(ChalkcastError::Directory(format!(
                "profile endpoint returned {status}"
            )));
        }

        let body: ApiEnvelope<ProfileData> = response
            .json()
            .await
            .map_err(|error| ChalkcastError::Directory(error.to_string()))?;
        if body.status != "ok" {
            return Ok(None);
        }
        Ok(body.data.and_then(|profile| profile.name))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
