//! Local HTTP callback listener for the OAuth redirect.
//!
//! When the login completes in the browser, the authorization server
//! redirects to `http://localhost:<port><path>?code=xxx&state=yyy`. A
//! [`ListenerSession`] owns the one listening socket for a login attempt,
//! consumes the first request on the redirect path, answers the browser with
//! a completion page, and closes.
//!
//! There is no HTTP server framework here; a single redirect is handled with
//! a raw [`tokio::net::TcpListener`].

use std::io::ErrorKind;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};

use crate::error::{AuthEngineError, Result};

/// The HTML page returned to the browser after a successful callback.
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Login Complete</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }
        .card {
            text-align: center;
            padding: 3rem;
            background: white;
            border-radius: 12px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.08);
        }
        h1 { color: #22c55e; margin-bottom: 0.5rem; }
        p { color: #666; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Login Complete</h1>
        <p>You can close this tab and return to your terminal.</p>
    </div>
</body>
</html>"#;

/// Failure page; `{message}` is replaced with the escaped reason.
const FAILURE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Login Failed</title>
</head>
<body style="font-family: system-ui, sans-serif; text-align: center; padding: 50px;">
    <h1 style="color: #dc2626;">Login Failed</h1>
    <p>{message}</p>
    <p>Return to your terminal and run the login again.</p>
</body>
</html>"#;

/// OAuth redirects are small GET requests, so 4KB is more than enough.
const REQUEST_BUFFER_BYTES: usize = 4096;

/// How long a connection may stay silent before it is dropped.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// The authorization code captured from a successful redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
}

// ---------------------------------------------------------------------------
// ListenerSession
// ---------------------------------------------------------------------------

/// A bound callback listener for a single login attempt.
///
/// The socket is released when the first matching redirect has been
/// answered, when the wait window elapses, or when the session is closed,
/// whichever comes first.
#[derive(Debug)]
pub struct ListenerSession {
    port: u16,
    callback_path: String,
    timeout: Duration,
    listener: Mutex<Option<TcpListener>>,
    closed: watch::Sender<bool>,
}

impl ListenerSession {
    /// Bind `127.0.0.1:{port}` and return the session owning the socket.
    ///
    /// Passing port `0` lets the OS choose; [`port`](Self::port) reports the
    /// bound port either way.
    ///
    /// # Errors
    ///
    /// - [`AuthEngineError::PortInUse`] if another process holds the port.
    /// - [`AuthEngineError::Io`] for any other bind failure.
    pub async fn start(
        port: u16,
        callback_path: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == ErrorKind::AddrInUse {
                AuthEngineError::PortInUse { port }
            } else {
                AuthEngineError::Io(e)
            }
        })?;
        let port = listener.local_addr()?.port();
        let (closed, _) = watch::channel(false);

        tracing::info!(port, "callback server listening for OAuth redirect");

        Ok(Self {
            port,
            callback_path: callback_path.into(),
            timeout,
            listener: Mutex::new(Some(listener)),
            closed,
        })
    }

    /// The port this session is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the session has been closed or consumed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Close the session. Idempotent.
    ///
    /// A pending [`wait_for_code`](Self::wait_for_code) resolves with `None`
    /// and releases the socket as it returns.
    pub fn close(&self) {
        self.closed.send_replace(true);
        if let Ok(mut guard) = self.listener.try_lock() {
            guard.take();
        }
    }

    /// Close the session and wait until the socket has actually been
    /// released, so the port can be bound again immediately.
    pub async fn shutdown(&self) {
        self.closed.send_replace(true);
        self.listener.lock().await.take();
    }

    /// Wait for the redirect and return the authorization code, or `None`
    /// if the attempt failed, timed out, or was cancelled.
    pub async fn wait_for_code(&self, expected_state: &str) -> Option<AuthorizationCode> {
        match self.wait_for_callback(expected_state).await {
            Ok(code) => Some(AuthorizationCode { code }),
            Err(e) => {
                tracing::warn!(error = %e, "OAuth callback did not produce a code");
                None
            }
        }
    }

    /// Like [`wait_for_code`](Self::wait_for_code) but reports why the
    /// attempt failed.
    ///
    /// # Errors
    ///
    /// - [`AuthEngineError::CallbackTimeout`] if no redirect arrives in time.
    /// - [`AuthEngineError::Cancelled`] if the session was closed or the
    ///   authorization server returned an `error` parameter.
    /// - [`AuthEngineError::MissingCode`] if the redirect carries no code.
    /// - [`AuthEngineError::StateMismatch`] if `state` does not match.
    pub async fn wait_for_callback(&self, expected_state: &str) -> Result<String> {
        let mut guard = self.listener.lock().await;
        let Some(listener) = guard.take() else {
            return Err(session_closed());
        };

        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(session_closed());
        }

        let timeout_secs = self.timeout.as_secs();
        let outcome = tokio::select! {
            served = tokio::time::timeout(self.timeout, self.serve(&listener, expected_state)) => {
                served.unwrap_or(Err(AuthEngineError::CallbackTimeout { timeout_secs }))
            }
            _ = closed.wait_for(|closed| *closed) => Err(session_closed()),
        };

        drop(listener);
        self.closed.send_replace(true);
        drop(guard);

        tracing::debug!(port = self.port, ok = outcome.is_ok(), "callback server closed");
        outcome
    }

    /// Accept connections until one hits the redirect path.
    ///
    /// Connections are read concurrently, so a socket the browser opens
    /// speculatively and never writes to cannot hold up the redirect.
    async fn serve(&self, listener: &TcpListener, expected_state: &str) -> Result<String> {
        let mut pending = FuturesUnordered::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!(peer = %peer, "accepted callback connection");
                    pending.push(read_request(stream));
                }
                Some((mut stream, request)) = pending.next(), if !pending.is_empty() => {
                    let Some(request) = request else { continue };
                    if let Some(outcome) = self.handle(&mut stream, &request, expected_state).await {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Answer one request. `None` means it was not the redirect.
    async fn handle(
        &self,
        stream: &mut TcpStream,
        request: &str,
        expected_state: &str,
    ) -> Option<Result<String>> {
        let Some(target) = request_target(request) else {
            respond(stream, "400 Bad Request", &failure_page("malformed request")).await;
            return None;
        };

        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path != self.callback_path {
            respond(stream, "404 Not Found", "not found").await;
            return None;
        }

        let outcome = CallbackParams::parse(query).into_code(expected_state);
        match &outcome {
            Ok(_) => {
                respond(stream, "200 OK", SUCCESS_HTML).await;
                tracing::info!("callback received, authorization code extracted");
            }
            Err(e) => {
                respond(stream, "400 Bad Request", &failure_page(&e.to_string())).await;
            }
        }
        Some(outcome)
    }
}

/// Read the request head. `None` for read errors and idle connections.
async fn read_request(mut stream: TcpStream) -> (TcpStream, Option<String>) {
    let mut buf = [0u8; REQUEST_BUFFER_BYTES];
    let request = match tokio::time::timeout(REQUEST_READ_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "failed to read callback request");
            None
        }
        Err(_) => {
            tracing::debug!("callback connection sent nothing, dropping it");
            None
        }
    };
    (stream, request)
}

fn session_closed() -> AuthEngineError {
    AuthEngineError::Cancelled {
        reason: "login session closed".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// Query parameters carried by the redirect.
#[derive(Debug, Default, PartialEq, Eq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn parse(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }

    /// Apply the callback policy: provider error, then missing code, then
    /// state check.
    fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            return Err(AuthEngineError::Cancelled {
                reason: self.error_description.unwrap_or(error),
            });
        }

        let code = self
            .code
            .filter(|c| !c.is_empty())
            .ok_or(AuthEngineError::MissingCode)?;

        if self.state.as_deref() != Some(expected_state) {
            return Err(AuthEngineError::StateMismatch);
        }

        Ok(code)
    }
}

/// Extract the request target from `GET /path?query HTTP/1.1`.
fn request_target(request: &str) -> Option<&str> {
    let mut parts = request.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    (method == "GET").then_some(target)
}

fn failure_page(message: &str) -> String {
    FAILURE_HTML.replace("{message}", &escape_html(message))
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Write a complete HTTP response. The browser's view is not significant to
/// the flow, so write failures are only logged.
async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!(error = %e, "failed to write callback response");
        return;
    }
    let _ = stream.flush().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
