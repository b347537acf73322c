//! Fixed endpoints and paths, plus the client credentials read from the environment.

use eyre::Context;
use std::path::PathBuf;

/// The redirect URI registered for the Vimeo app. Must match the app settings exactly.
pub const REDIRECT_URI: &str = "http://localhost:8080/callback";
pub const CALLBACK_PORT: u16 = 8080;
pub const CALLBACK_PATH: &str = "/callback";

pub const AUTH_URL: &str = "https://api.vimeo.com/oauth/authorize";
pub const TOKEN_URL: &str = "https://api.vimeo.com/oauth/access_token";

pub const TOKEN_FILE: &str = "vimeo_token.json";
pub const DOWNLOAD_DIR: &str = "downloads";

pub const CLIENT_ID_VAR: &str = "VIMEO_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "VIMEO_CLIENT_SECRET";

/// Where the OAuth callback listener is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectConfig {
    /// Host name as it appears in the redirect URI. The listener itself always binds loopback.
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: CALLBACK_PORT,
            path: CALLBACK_PATH.to_string(),
        }
    }
}

impl RedirectConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }
}

/// OAuth client credentials of the Vimeo app.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}

/// Everything a command needs to know about its environment.
#[derive(Debug, Clone)]
pub struct Config {
    client_id: Option<String>,
    client_secret: Option<String>,
    pub token_file: PathBuf,
    pub download_dir: PathBuf,
    pub redirect: RedirectConfig,
}

impl Config {
    /// Reads the process environment, after loading `.env` from the working directory if present.
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "ignoring unreadable .env file"),
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            client_id: var(CLIENT_ID_VAR),
            client_secret: var(CLIENT_SECRET_VAR),
            token_file: PathBuf::from(TOKEN_FILE),
            download_dir: PathBuf::from(DOWNLOAD_DIR),
            redirect: RedirectConfig::default(),
        }
    }

    /// The app credentials; only the `auth` command needs them.
    pub fn credentials(&self) -> eyre::Result<Credentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Credentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => Err(eyre::eyre!(
                "set {CLIENT_ID_VAR} and {CLIENT_SECRET_VAR} (in the environment or a .env file)"
            ))
            .context(
                "Vimeo client credentials are missing; create an app at \
                 https://developer.vimeo.com/apps with redirect URI http://localhost:8080/callback",
            ),
        }
    }
}
