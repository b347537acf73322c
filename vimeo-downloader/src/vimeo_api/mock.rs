//! In-memory stand-in for the Vimeo API.
//!
//! Responses are registered per `(path, params)` pair; anything unregistered answers `404`.
//! Every call is recorded so tests can assert on which endpoints were (not) hit.

use crate::vimeo_api::client::VimeoApi;
use crate::vimeo_api::types::ApiResponse;
use std::collections::HashMap;
use std::sync::Mutex;

type RouteKey = (String, Vec<(String, String)>);

#[derive(Debug, Default)]
pub(crate) struct MockApi {
    routes: HashMap<RouteKey, Result<ApiResponse, String>>,
    calls: Mutex<Vec<RouteKey>>,
}

fn key(path: &str, params: &[(&str, &str)]) -> RouteKey {
    (
        path.to_string(),
        params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

impl MockApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answers `GET path?params` with `status` and `body`.
    pub(crate) fn on(
        mut self,
        path: &str,
        params: &[(&str, &str)],
        status: u16,
        body: serde_json::Value,
    ) -> Self {
        let status = http::StatusCode::from_u16(status).expect("valid status code in test");
        self.routes
            .insert(key(path, params), Ok(ApiResponse { status, body }));
        self
    }

    /// Fails `GET path?params` as if the connection had dropped.
    pub(crate) fn failing(mut self, path: &str, params: &[(&str, &str)]) -> Self {
        self.routes
            .insert(key(path, params), Err(format!("connection reset: {path}")));
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The paths of all calls made so far, with query parameters rendered `k=v` and `&`-joined.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(path, params)| {
                if params.is_empty() {
                    path.clone()
                } else {
                    let query: Vec<_> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    format!("{path}?{}", query.join("&"))
                }
            })
            .collect()
    }
}

impl VimeoApi for MockApi {
    async fn get(&self, path: &str, params: &[(&str, &str)]) -> eyre::Result<ApiResponse> {
        let key = key(path, params);
        self.calls.lock().unwrap().push(key.clone());
        match self.routes.get(&key) {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(e)) => Err(eyre::eyre!("{e}")),
            None => Ok(ApiResponse {
                status: http::StatusCode::NOT_FOUND,
                body: serde_json::json!({ "error": "The requested page could not be found" }),
            }),
        }
    }
}
