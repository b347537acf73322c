//! Single-use HTTP server that receives the OAuth redirect.
//!
//! After the user approves (or denies) access in their browser, Vimeo redirects the browser to
//! our redirect URL with either a `code` or an `error` in the query string. [`CallbackListener`]
//! serves that URL on a background task, records the first callback it sees, and hands it to
//! whoever is waiting in [`CallbackListener::wait_for_result`].
//!
//! The listener state lives in a [`watch`] channel. The callback result is stored *as part of*
//! the transition to [`ListenerState::Captured`], so a waiter that observes the transition also
//! observes the result.

use crate::config::RedirectConfig;
use bytes::Bytes;
use eyre::Context;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long to wait for the user to get through the consent screen.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the waiter re-checks the listener state.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a failed `accept`, so a persistent failure (out of file descriptors) can't spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

const SUCCESS_PAGE: &str = "<html>
<head><title>Authorization Successful</title></head>
<body>
<h1>Authorization Successful!</h1>
<p>You can close this window and return to the command line.</p>
</body>
</html>
";

/// What the OAuth redirect carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    /// The user granted access. `state` is echoed back from the authorization request.
    Code {
        code: String,
        state: Option<String>,
    },
    /// The user denied access, or the provider reported some other problem.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Captured(CallbackResult),
    TimedOut,
    Stopped,
}

/// A running OAuth redirect receiver.
///
/// Honors exactly one callback. The socket is released once a callback is captured or the wait
/// times out, and when the listener is stopped or dropped.
#[derive(Debug)]
pub struct CallbackListener {
    local_addr: SocketAddr,
    state: Arc<watch::Sender<ListenerState>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Binds the loopback interface on the configured port and starts serving the redirect path.
    ///
    /// `127.0.0.1` must be available. `[::1]` is bound on the same port as well when the host
    /// supports it, since browsers may resolve `localhost` to either. Port 0 picks a free port;
    /// see [`Self::local_addr`].
    pub async fn start(config: &RedirectConfig) -> eyre::Result<Self> {
        let socket = TcpListener::bind((Ipv4Addr::LOCALHOST, config.port))
            .await
            .with_context(|| {
                format!(
                    "bind OAuth callback listener to 127.0.0.1:{} (is another `auth` running?)",
                    config.port
                )
            })?;
        let local_addr = socket.local_addr().context("get local address")?;
        let socket_v6 = match TcpListener::bind((Ipv6Addr::LOCALHOST, local_addr.port())).await {
            Ok(socket) => Some(socket),
            Err(e) => {
                tracing::debug!(error = %e, "IPv6 loopback unavailable, listening on IPv4 only");
                None
            }
        };

        let (state, _) = watch::channel(ListenerState::Listening);
        let state = Arc::new(state);
        let task = tokio::spawn(accept_loop(
            socket,
            socket_v6,
            Arc::from(config.path.as_str()),
            Arc::clone(&state),
        ));

        tracing::debug!(%local_addr, path = config.path, "listening for OAuth callback");
        Ok(Self {
            local_addr,
            state,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        self.state.borrow().clone()
    }

    /// Waits for the redirect to arrive, for at most `timeout`.
    ///
    /// The listener is shut down before this returns, whatever the outcome. Running out of time
    /// is an error: the user has to start the authentication over.
    pub async fn wait_for_result(mut self, timeout: Duration) -> eyre::Result<CallbackResult> {
        let deadline = Instant::now() + timeout;
        let mut changes = self.state.subscribe();

        let outcome = loop {
            let current = changes.borrow_and_update().clone();
            match current {
                ListenerState::Captured(result) => break Ok(result),
                ListenerState::TimedOut | ListenerState::Stopped => {
                    break Err(eyre::eyre!("OAuth callback listener is no longer running"));
                }
                ListenerState::Listening => {}
            }

            let now = Instant::now();
            if now >= deadline {
                // a callback may have raced us to the state, in which case it still counts
                let mut late = None;
                self.state.send_if_modified(|state| match state {
                    ListenerState::Listening => {
                        *state = ListenerState::TimedOut;
                        true
                    }
                    ListenerState::Captured(result) => {
                        late = Some(result.clone());
                        false
                    }
                    _ => false,
                });
                break late.ok_or_else(|| {
                    eyre::eyre!("no OAuth callback received within {timeout:?}")
                });
            }

            // woken early by any state change, so the poll interval only bounds idle wake-ups
            let _ = tokio::time::timeout(POLL_INTERVAL.min(deadline - now), changes.changed())
                .await;
        };

        self.shut_down().await;
        outcome
    }

    /// Stops serving without waiting for a callback.
    pub async fn stop(mut self) {
        self.shut_down().await;
    }

    async fn shut_down(&mut self) {
        self.state.send_replace(ListenerState::Stopped);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "OAuth callback listener task failed");
            }
        }
        tracing::debug!(local_addr = %self.local_addr, "OAuth callback listener stopped");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Accepts connections until the listener leaves [`ListenerState::Listening`].
async fn accept_loop(
    socket: TcpListener,
    socket_v6: Option<TcpListener>,
    path: Arc<str>,
    state: Arc<watch::Sender<ListenerState>>,
) {
    let mut changes = state.subscribe();
    loop {
        let (conn, peer) = tokio::select! {
            accepted = accept_with_retry(|| accept_any(&socket, socket_v6.as_ref())) => accepted,
            _ = changes.wait_for(|state| *state != ListenerState::Listening) => break,
        };
        tracing::trace!(%peer, "accepted OAuth callback connection");

        let conn = hyper_util::rt::TokioIo::new(conn);
        let path = Arc::clone(&path);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = respond(&req, &path, &state);
                async move { Ok::<_, Infallible>(response) }
            });
            // one response per connection, so nothing lingers once the callback is handled
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .keep_alive(false)
                .serve_connection(conn, service)
                .await
            {
                tracing::debug!(%peer, error = %e, "OAuth callback connection failed");
            }
        });
    }
}

async fn accept_any(
    v4: &TcpListener,
    v6: Option<&TcpListener>,
) -> std::io::Result<(TcpStream, SocketAddr)> {
    match v6 {
        Some(v6) => tokio::select! {
            accepted = v4.accept() => accepted,
            accepted = v6.accept() => accepted,
        },
        None => v4.accept().await,
    }
}

/// Calls `accept` until it succeeds, pausing [`ACCEPT_RETRY_DELAY`] after every failure.
async fn accept_with_retry<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept OAuth callback connection");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Handles one request, recording the callback if it is the first one to the redirect path.
fn respond<B>(
    req: &Request<B>,
    path: &str,
    state: &watch::Sender<ListenerState>,
) -> Response<Full<Bytes>> {
    if req.uri().path() != path {
        return plain(StatusCode::NOT_FOUND, "Not found");
    }

    let result = parse_callback(req.uri().query());
    let captured = state.send_if_modified(|state| {
        if *state == ListenerState::Listening {
            *state = ListenerState::Captured(result.clone());
            true
        } else {
            false
        }
    });
    if !captured {
        tracing::warn!("ignoring repeated OAuth callback");
        return plain(
            StatusCode::GONE,
            "This authorization request has already been handled.",
        );
    }

    let page = match &result {
        CallbackResult::Code { .. } => {
            tracing::info!("received OAuth authorization code");
            SUCCESS_PAGE.to_string()
        }
        CallbackResult::Error(error) => {
            tracing::warn!(error, "OAuth authorization failed");
            format!(
                "<html>\n<head><title>Authorization Failed</title></head>\n<body>\n\
                 <h1>Authorization Failed</h1>\n<p>Error: {}</p>\n</body>\n</html>\n",
                escape_html(error)
            )
        }
    };
    let mut response = Response::new(Full::from(page));
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::from(body));
    *response.status_mut() = status;
    response
}

/// Reads the redirect's query string. An empty `code` counts as no code.
fn parse_callback(query: Option<&str>) -> CallbackResult {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (k, v) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        let v = Some(v.into_owned()).filter(|v| !v.is_empty());
        match &*k {
            "code" => code = v,
            "state" => state = v,
            "error" => error = v,
            "error_description" => description = v,
            _ => {}
        }
    }

    match (code, error, description) {
        (Some(code), _, _) => CallbackResult::Code { code, state },
        (None, Some(error), Some(description)) => {
            CallbackResult::Error(format!("{error}: {description}"))
        }
        (None, Some(error), None) => CallbackResult::Error(error),
        (None, None, _) => CallbackResult::Error("Unknown error".to_string()),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ephemeral() -> RedirectConfig {
        RedirectConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            path: "/callback".to_string(),
        }
    }

    fn url(listener: &CallbackListener, path_and_query: &str) -> String {
        format!("http://{}{path_and_query}", listener.local_addr())
    }

    #[tokio::test]
    async fn captures_code() {
        let listener = CallbackListener::start(&ephemeral()).await.unwrap();
        let response = reqwest::get(url(&listener, "/callback?code=ABC&state=xyz"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.text().await.unwrap().contains("Authorization Successful"));

        let result = listener.wait_for_result(DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(
            result,
            CallbackResult::Code {
                code: "ABC".to_string(),
                state: Some("xyz".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn captures_error() {
        let listener = CallbackListener::start(&ephemeral()).await.unwrap();
        let response = reqwest::get(url(&listener, "/callback?error=denied"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let page = response.text().await.unwrap();
        assert!(page.contains("Authorization Failed"), "{page}");
        assert!(page.contains("Error: denied"), "{page}");

        let result = listener.wait_for_result(DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(result, CallbackResult::Error("denied".to_string()));
    }

    #[tokio::test]
    async fn waiter_wakes_up_promptly() {
        let listener = CallbackListener::start(&ephemeral()).await.unwrap();
        let target = url(&listener, "/callback?code=late");
        let waiter = tokio::spawn(listener.wait_for_result(DEFAULT_TIMEOUT));

        tokio::time::sleep(Duration::from_millis(50)).await;
        reqwest::get(target).await.unwrap();

        let result = tokio::time::timeout(POLL_INTERVAL * 2, waiter)
            .await
            .expect("waiter should finish within the poll interval")
            .unwrap()
            .unwrap();
        assert_eq!(
            result,
            CallbackResult::Code {
                code: "late".to_string(),
                state: None,
            }
        );
    }

    #[tokio::test]
    async fn times_out_and_releases_the_port() {
        let listener = CallbackListener::start(&ephemeral()).await.unwrap();
        let addr = listener.local_addr();

        let err = listener
            .wait_for_result(Duration::from_millis(200))
            .await
            .unwrap_err();
        insta::assert_snapshot!(err, @"no OAuth callback received within 200ms");

        TcpListener::bind(addr)
            .await
            .expect("port should be free after the listener timed out");
    }

    #[tokio::test]
    async fn reachable_over_ipv6_loopback() {
        if std::net::TcpListener::bind("[::1]:0").is_err() {
            // host without IPv6
            return;
        }
        let listener = CallbackListener::start(&ephemeral()).await.unwrap();
        let port = listener.local_addr().port();
        let response = reqwest::get(format!("http://[::1]:{port}/callback?code=v6"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            listener.wait_for_result(DEFAULT_TIMEOUT).await.unwrap(),
            CallbackResult::Code {
                code: "v6".to_string(),
                state: None,
            }
        );
    }

    #[tokio::test]
    async fn failed_accepts_back_off() {
        let mut attempts = 0;
        let started = Instant::now();
        let accepted = accept_with_retry(|| {
            attempts += 1;
            let attempt = attempts;
            async move {
                if attempt <= 3 {
                    Err(std::io::Error::other("too many open files"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(accepted, 4);
        assert!(started.elapsed() >= ACCEPT_RETRY_DELAY * 3);
    }

    #[tokio::test]
    async fn other_paths_are_not_callbacks() {
        let listener = CallbackListener::start(&ephemeral()).await.unwrap();
        let response = reqwest::get(url(&listener, "/favicon.ico?code=nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(listener.state(), ListenerState::Listening);
        listener.stop().await;
    }

    #[test]
    fn only_the_first_callback_counts() {
        let (state, _) = watch::channel(ListenerState::Listening);
        let first = Request::builder()
            .uri("/callback?code=first")
            .body(())
            .unwrap();
        let second = Request::builder()
            .uri("/callback?code=second")
            .body(())
            .unwrap();

        assert_eq!(respond(&first, "/callback", &state).status(), StatusCode::OK);
        assert_eq!(respond(&second, "/callback", &state).status(), StatusCode::GONE);
        assert_eq!(
            *state.borrow(),
            ListenerState::Captured(CallbackResult::Code {
                code: "first".to_string(),
                state: None,
            })
        );
    }

    #[test]
    fn query_parsing() {
        assert_eq!(
            parse_callback(Some("code=a%20b&state=s")),
            CallbackResult::Code {
                code: "a b".to_string(),
                state: Some("s".to_string()),
            }
        );
        assert_eq!(
            parse_callback(Some("error=access_denied&error_description=The+user+said+no")),
            CallbackResult::Error("access_denied: The user said no".to_string())
        );
        assert_eq!(
            parse_callback(Some("code=&error=")),
            CallbackResult::Error("Unknown error".to_string())
        );
        assert_eq!(
            parse_callback(None),
            CallbackResult::Error("Unknown error".to_string())
        );
    }

    #[test]
    fn error_page_is_escaped() {
        let (state, _) = watch::channel(ListenerState::Listening);
        let req = Request::builder()
            .uri("/callback?error=%3Cscript%3E")
            .body(())
            .unwrap();
        let response = respond(&req, "/callback", &state);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(escape_html("<script>&\"'"), "&lt;script&gt;&amp;&quot;&#39;");
    }
}
