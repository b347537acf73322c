//! Persistence of the single access token this tool works with.

use eyre::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An access token obtained through the `auth` command.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    /// Space-separated scopes the token was granted.
    #[serde(default)]
    pub scope: String,
    pub created_at: jiff::Timestamp,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"[redacted]")
            .field("scope", &self.scope)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A JSON file holding at most one [`AuthToken`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> eyre::Result<AuthToken> {
        let token = self
            .read()
            .with_context(|| {
                format!(
                    "no usable token in {}; run `vimeo-downloader auth` first",
                    self.path.display()
                )
            })?;
        Ok(token)
    }

    fn read(&self) -> eyre::Result<AuthToken> {
        let raw = std::fs::read(&self.path).context("read token file")?;
        let token: AuthToken = serde_json::from_slice(&raw).context("parse token file")?;
        if token.access_token.is_empty() {
            eyre::bail!("token file holds an empty access token");
        }
        Ok(token)
    }

    /// Replaces whatever token was stored before.
    pub fn save(&self, token: &AuthToken) -> eyre::Result<()> {
        if token.access_token.is_empty() {
            eyre::bail!("refusing to store an empty access token");
        }
        let json = serde_json::to_vec_pretty(token).context("serialize token")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("write token file {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), "saved access token");
        Ok(())
    }
}
