//! OAuth 2.0 authorization-code flow against Vimeo.
//!
//! There is exactly one way to get a token: the user approves the app in their browser, Vimeo
//! redirects to our local [`CallbackListener`], and the code it carries is exchanged for an
//! access token. Vimeo tokens don't expire, so there is no refresh.

use crate::callback::{CallbackListener, CallbackResult, DEFAULT_TIMEOUT};
use crate::config::{self, Config, Credentials, RedirectConfig};
use crate::token::{AuthToken, TokenStore};
use eyre::Context;
use oauth2::basic::BasicClient;
use oauth2::url::Url;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use std::time::Duration;

/// Scopes needed to list private videos and read their file links.
const SCOPES: [&str; 2] = ["private", "video_files"];

/// Where the authorization and token endpoints live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            auth_url: config::AUTH_URL.to_string(),
            token_url: config::TOKEN_URL.to_string(),
        }
    }
}

/// Drives one user through the OAuth flow and stores the resulting token.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    credentials: Credentials,
    endpoints: OAuthEndpoints,
    redirect: RedirectConfig,
    store: TokenStore,
    timeout: Duration,
}

impl OAuthManager {
    pub fn new(credentials: Credentials, redirect: RedirectConfig, store: TokenStore) -> Self {
        Self {
            credentials,
            endpoints: OAuthEndpoints::default(),
            redirect,
            store,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Fails if the client credentials are not configured.
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        Ok(Self::new(
            config.credentials()?,
            config.redirect.clone(),
            TokenStore::new(&config.token_file),
        ))
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// How long to wait for the user to finish in the browser.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Performs a complete authorization flow and persists the new token.
    ///
    /// `present` is handed the authorization URL once the callback listener is ready; the CLI
    /// passes [`open_in_browser`].
    pub async fn authenticate<P>(&self, present: P) -> eyre::Result<AuthToken>
    where
        P: FnOnce(&Url),
    {
        // listen before the user can possibly be redirected
        let listener = CallbackListener::start(&self.redirect)
            .await
            .context("start OAuth callback listener")?;
        let redirect = RedirectConfig {
            port: listener.local_addr().port(),
            ..self.redirect.clone()
        };

        let client = BasicClient::new(ClientId::new(self.credentials.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.credentials.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(self.endpoints.auth_url.clone())
                    .context("parse authorization endpoint URL")?,
            )
            .set_token_uri(
                TokenUrl::new(self.endpoints.token_url.clone())
                    .context("parse token endpoint URL")?,
            )
            .set_redirect_uri(RedirectUrl::new(redirect.url()).context("construct redirect url")?);

        let (auth_url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(SCOPES.iter().map(|scope| Scope::new(scope.to_string())))
            .url();

        tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
        present(&auth_url);

        let result = listener
            .wait_for_result(self.timeout)
            .await
            .context("await user authorization")?;
        let code = match result {
            CallbackResult::Code { code, state } => {
                if state.as_deref() != Some(csrf.secret().as_str()) {
                    eyre::bail!("OAuth callback carried the wrong state; refusing the code");
                }
                AuthorizationCode::new(code)
            }
            CallbackResult::Error(error) => eyre::bail!("authorization was not granted: {error}"),
        };

        let http_client = oauth2::reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .context("build HTTP client for token exchange")?;
        let response = client
            .exchange_code(code)
            .request_async(&http_client)
            .await
            .context("exchange authorization code for access token")?;

        let access_token = response.access_token().secret().clone();
        if access_token.is_empty() {
            eyre::bail!("token endpoint returned an empty access token");
        }
        let scope = response
            .scopes()
            .map(|scopes| {
                scopes
                    .iter()
                    .map(|scope| scope.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        let token = AuthToken {
            access_token,
            scope,
            created_at: jiff::Timestamp::now(),
        };
        self.store.save(&token).context("persist access token")?;
        Ok(token)
    }
}

/// Prints the authorization URL and tries to open it in the user's browser.
pub fn open_in_browser(url: &Url) {
    println!("Please visit this URL to authorize the application:\n\n{url}\n");
    if let Err(e) = webbrowser::open(url.as_str()) {
        tracing::warn!(error = %e, "could not open a browser; open the URL above manually");
    }
}
