//! Core Vimeo API client functionality.

use crate::vimeo_api::types::ApiResponse;
use eyre::Context;
use http::Method;
use std::future::Future;
use tracing::instrument;

/// Base URL that relative API paths are resolved against.
pub const API_BASE_URL: &str = "https://api.vimeo.com";

/// Pins the response format to a known API version.
const ACCEPT_HEADER: &str = "application/vnd.vimeo.*+json;version=3.4";

/// The one capability the rest of the crate needs from the Vimeo API: an authenticated `GET`.
///
/// Implementations return `Err` only for transport-level failures. Any HTTP status, including
/// errors, comes back as an [`ApiResponse`] so callers can decide what a non-200 means for them.
pub trait VimeoApi: Send + Sync {
    fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> impl Future<Output = eyre::Result<ApiResponse>> + Send;
}

/// Client for the Vimeo REST API, authenticated with a user access token.
#[derive(Debug, Clone)]
pub struct VimeoClient {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl VimeoClient {
    /// Creates a client that sends `access_token` as a bearer token on every request.
    pub fn new(access_token: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            access_token: access_token.into(),
            base_url: API_BASE_URL.to_string(),
            client,
        }
    }

    /// Points the client at a different API host (used to talk to local test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Resolves `path` against the API base.
    ///
    /// Pagination cursors are usually relative (`/me/videos?page=2`), but absolute URLs are
    /// accepted as-is.
    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// Makes an authenticated HTTP request to the Vimeo API.
    ///
    /// Unlike most request helpers, a non-success status is *not* turned into an error: several
    /// callers treat specific statuses as "try something else" rather than as failures.
    #[instrument(skip(self), level = tracing::Level::TRACE)]
    pub(crate) async fn make_authenticated_request(
        &self,
        method: Method,
        path: &str,
        query_params: &[(&str, &str)],
    ) -> eyre::Result<ApiResponse> {
        let url = self.url_for(path);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.access_token)
            .header(http::header::ACCEPT, ACCEPT_HEADER);
        if !query_params.is_empty() {
            request = request.query(query_params);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("send {method} request to Vimeo API: {url}"))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("read Vimeo API response body: {url}"))?;
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::debug!(%url, %status, error = %e, "Vimeo API response is not JSON");
                serde_json::Value::Null
            })
        };

        if !status.is_success() {
            tracing::debug!(%url, %status, "Vimeo API request was not successful");
        }

        Ok(ApiResponse { status, body })
    }
}

impl VimeoApi for VimeoClient {
    async fn get(&self, path: &str, params: &[(&str, &str)]) -> eyre::Result<ApiResponse> {
        self.make_authenticated_request(Method::GET, path, params)
            .await
    }
}
